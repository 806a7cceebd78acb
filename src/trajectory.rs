//! Biased trajectories and bias deposition records, and their text formats.
//!
//! Both formats are whitespace-separated numeric columns with `#` comment lines, as written
//! by PLUMED. A COLVAR file holds `time  coordinate  bias  ...` rows; a HILLS file holds
//! `time  position  ...` rows, one per deposited Gaussian.

use crate::errors::*;
use ndarray::{s, Array1, ArrayView1};
use std::io::{BufRead, Write};
use std::path::Path;

/// A reaction coordinate time series under a time-dependent bias
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    time: Array1<f64>,
    coordinate: Array1<f64>,
    bias: Array1<f64>,
}

impl Trajectory {
    /// Assemble a trajectory from its three columns
    ///
    /// The columns must have equal lengths, contain at least two finite samples, and `time`
    /// must be strictly increasing.
    pub fn from_columns(
        time: Array1<f64>,
        coordinate: Array1<f64>,
        bias: Array1<f64>,
    ) -> Result<Self> {
        if coordinate.len() != time.len() {
            return Err(ImetadError::ArrayLengthMismatch(coordinate.len(), time.len()));
        }
        if bias.len() != time.len() {
            return Err(ImetadError::ArrayLengthMismatch(bias.len(), time.len()));
        }
        if time.len() < 2 {
            return Err(ImetadError::format(
                0,
                format!("a trajectory needs at least 2 samples, got {}", time.len()),
            ));
        }

        for (n, ((t, x), b)) in time.iter().zip(&coordinate).zip(&bias).enumerate() {
            if !(t.is_finite() && x.is_finite() && b.is_finite()) {
                return Err(ImetadError::format(0, format!("sample {} is not finite", n)));
            }
        }
        if let Some(n) = (1..time.len()).find(|&n| time[n] <= time[n - 1]) {
            return Err(ImetadError::format(
                0,
                format!("time is not strictly increasing at sample {}", n),
            ));
        }

        Ok(Self {
            time,
            coordinate,
            bias,
        })
    }

    /// Parse COLVAR text, discarding the last `drop_trailing_rows` data rows
    pub fn parse_colvar<R: BufRead>(reader: R, drop_trailing_rows: usize) -> Result<Self> {
        let rows = parse_rows(reader, 3, drop_trailing_rows)?;

        let time = rows.iter().map(|row| row[0]).collect();
        let coordinate = rows.iter().map(|row| row[1]).collect();
        let bias = rows.iter().map(|row| row[2]).collect();
        Self::from_columns(time, coordinate, bias)
    }

    /// Read a COLVAR file from disk
    pub fn read_colvar(path: impl AsRef<Path>, drop_trailing_rows: usize) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::parse_colvar(std::io::BufReader::new(file), drop_trailing_rows)
    }

    /// Write the trajectory as COLVAR text with a `#! FIELDS` header
    pub fn write_colvar<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "#! FIELDS time cv metad.bias")?;
        for ((t, x), b) in self.time.iter().zip(&self.coordinate).zip(&self.bias) {
            writeln!(writer, " {:.6} {:.10} {:.10}", t, x, b)?;
        }
        Ok(())
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Always false; a trajectory holds at least two samples
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Sample times
    pub fn time(&self) -> ArrayView1<'_, f64> {
        self.time.view()
    }

    /// Reaction coordinate values
    pub fn coordinate(&self) -> ArrayView1<'_, f64> {
        self.coordinate.view()
    }

    /// Instantaneous bias energies in kJ/mol
    pub fn bias(&self) -> ArrayView1<'_, f64> {
        self.bias.view()
    }

    /// Time step, taken from the first two samples
    pub fn dt(&self) -> f64 {
        self.time[1] - self.time[0]
    }

    /// Bias energies of the samples before `end`
    pub fn bias_before(&self, end: usize) -> ArrayView1<'_, f64> {
        self.bias.slice(s![..end])
    }
}

/// Times and positions of the Gaussians deposited during a run
#[derive(Debug, Clone, PartialEq)]
pub struct Depositions {
    /// Deposition times
    pub time: Array1<f64>,
    /// Reaction coordinate value at each deposition
    pub position: Array1<f64>,
}

impl Depositions {
    /// Parse HILLS text
    pub fn parse_hills<R: BufRead>(reader: R) -> Result<Self> {
        let rows = parse_rows(reader, 2, 0)?;
        Ok(Self {
            time: rows.iter().map(|row| row[0]).collect(),
            position: rows.iter().map(|row| row[1]).collect(),
        })
    }

    /// Read a HILLS file from disk
    pub fn read_hills(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::parse_hills(std::io::BufReader::new(file))
    }

    /// Number of Gaussians deposited strictly before time `t`
    pub fn count_before(&self, t: f64) -> usize {
        self.time.iter().filter(|&&deposited| deposited < t).count()
    }
}

/// Read the numeric rows of a PLUMED-style column file, requiring `min_columns` per row
///
/// The last `skip_last` data rows are dropped before parsing; they may be cut short.
fn parse_rows<R: BufRead>(
    reader: R,
    min_columns: usize,
    skip_last: usize,
) -> Result<Vec<Vec<f64>>> {
    let mut lines = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if !(trimmed.is_empty() || trimmed.starts_with('#')) {
            lines.push((n + 1, trimmed.to_string()));
        }
    }
    lines.truncate(lines.len().saturating_sub(skip_last));

    lines
        .iter()
        .map(|(line, text)| {
            let row = text
                .split_whitespace()
                .map(|token| {
                    token.parse::<f64>().map_err(|_| {
                        ImetadError::format(*line, format!("'{}' is not a number", token))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;

            if row.len() < min_columns {
                return Err(ImetadError::format(
                    *line,
                    format!("expected at least {} columns, found {}", min_columns, row.len()),
                ));
            }
            Ok(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::trajectory::*;
    use ndarray::array;

    const COLVAR: &str = "\
#! FIELDS time phi metad.bias
#! SET min_phi -pi
0.000 3.0 0.0
0.100 2.9 0.5

0.200 0.1 1.0 7.0
0.300 0.0 1.5
0.400 -0.1 2.0";

    #[test]
    fn parse_colvar_skips_comments_and_trailing_row() {
        let traj = Trajectory::parse_colvar(COLVAR.as_bytes(), 1).unwrap();

        assert_eq!(traj.len(), 4);
        assert_eq!(traj.time(), array![0.0, 0.1, 0.2, 0.3]);
        assert_eq!(traj.coordinate(), array![3.0, 2.9, 0.1, 0.0]);
        assert_eq!(traj.bias(), array![0.0, 0.5, 1.0, 1.5]);
        assert!((traj.dt() - 0.1).abs() < 1e-12);
        assert_eq!(traj.bias_before(2), array![0.0, 0.5]);
    }

    #[test]
    fn truncated_last_row_is_dropped_unparsed() {
        let text = "0.0 3.0 0.0\n0.1 2.9 0.5\n0.2 2.8 1.0\n0.3 2.";
        let traj = Trajectory::parse_colvar(text.as_bytes(), 1).unwrap();
        assert_eq!(traj.len(), 3);
        assert!(Trajectory::parse_colvar(text.as_bytes(), 0).is_err());
    }

    #[test]
    fn parse_colvar_keeps_everything_when_asked() {
        let traj = Trajectory::parse_colvar(COLVAR.as_bytes(), 0).unwrap();
        assert_eq!(traj.len(), 5);
    }

    #[test]
    fn reject_malformed_colvar() {
        let text = "0.0 1.0 0.0\n0.1 oops 0.0\n";
        match Trajectory::parse_colvar(text.as_bytes(), 0) {
            Err(ImetadError::Format { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result {:?}", other),
        }

        let short = "0.0 1.0 0.0\n0.1 1.0\n";
        assert!(matches!(
            Trajectory::parse_colvar(short.as_bytes(), 0),
            Err(ImetadError::Format { line: 2, .. })
        ));
    }

    #[test]
    fn reject_non_increasing_time() {
        let result = Trajectory::from_columns(
            array![0.0, 0.1, 0.1],
            array![1.0, 1.0, 1.0],
            array![0.0, 0.0, 0.0],
        );
        assert!(matches!(result, Err(ImetadError::Format { .. })));
    }

    #[test]
    fn reject_mismatched_columns() {
        let result = Trajectory::from_columns(
            array![0.0, 0.1, 0.2],
            array![1.0, 1.0],
            array![0.0, 0.0, 0.0],
        );
        assert!(matches!(result, Err(ImetadError::ArrayLengthMismatch(2, 3))));
    }

    #[test]
    fn reject_too_short_trajectory() {
        let result = Trajectory::parse_colvar("#! FIELDS\n0.0 1.0 0.0\n0.1 1.0 0.0\n".as_bytes(), 1);
        assert!(matches!(result, Err(ImetadError::Format { .. })));
    }

    #[test]
    fn written_colvar_reads_back() {
        let traj = Trajectory::from_columns(
            array![0.0, 0.5, 1.0],
            array![3.0, 1.5, 0.0],
            array![0.25, 0.5, 0.75],
        )
        .unwrap();
        let mut text = Vec::new();
        traj.write_colvar(&mut text).unwrap();

        assert!(text.starts_with(b"#! FIELDS"));
        assert_eq!(Trajectory::parse_colvar(&text[..], 0).unwrap(), traj);
    }

    #[test]
    fn count_depositions_before_crossing() {
        let hills = "#! FIELDS time phi sigma_phi height biasf\n\
                     1.0 3.0 0.35 1.2 10\n\
                     2.0 2.8 0.35 1.1 10\n\
                     3.0 -2.9 0.35 1.0 10\n";
        let deps = Depositions::parse_hills(hills.as_bytes()).unwrap();

        assert_eq!(deps.time, array![1.0, 2.0, 3.0]);
        assert_eq!(deps.position, array![3.0, 2.8, -2.9]);
        assert_eq!(deps.count_before(2.5), 2);
        assert_eq!(deps.count_before(1.0), 0);
    }
}
