use std::path::Path;

use crate::session::observation::ObservationLog;

/// Writes the collected observation log as CSV.
///
/// Header is `step,c0,c1,…` with one column per observation channel; the
/// channel order is the engine's vector order.
pub fn write_observation_csv(log: &ObservationLog, path: &Path) -> Result<(), std::io::Error> {
    let mut wtr = csv::Writer::from_path(path)?;
    let width = log.data.first().map_or(0, |v| v.len());
    let mut header = vec!["step".to_string()];
    header.extend((0..width).map(|i| format!("c{i}")));
    wtr.write_record(&header)?;
    for (step, vals) in log.steps.iter().zip(log.data.iter()) {
        let mut record = vec![step.to_string()];
        record.extend(vals.iter().map(|v| v.to_string()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    #[test]
    fn test_csv_roundtrip() {
        let mut log = ObservationLog::default();
        log.steps.push(0);
        log.data.push(DVector::from_vec(vec![1.0, 2.5]));
        log.steps.push(1);
        log.data.push(DVector::from_vec(vec![0.9, 2.4]));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.csv");
        write_observation_csv(&log, &path).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(&headers[0], "step");
        assert_eq!(headers.len(), 3);
        let rows: Vec<_> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][0], "1");
        assert_eq!(&rows[1][2], "2.4");
    }
}
