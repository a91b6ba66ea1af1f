//! CSV station table used by directory formats
//!
//! Header row names the columns; `network`, `station`, `latitude`, `longitude`
//! and `elevation` are required, `location` is optional.

use std::path::Path;

use super::traits::{StationId, StationLocation};
use crate::error::SetupError;

pub fn read_station_table(path: &Path) -> Result<Vec<StationLocation>, SetupError> {
    let text = std::fs::read_to_string(path).map_err(|source| SetupError::Scan {
        path: path.to_path_buf(),
        source,
    })?;
    parse_station_table(path, &text)
}

pub fn parse_station_table(path: &Path, text: &str) -> Result<Vec<StationLocation>, SetupError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| SetupError::EmptyStationTable(path.to_path_buf()))?;
    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().to_ascii_lowercase())
        .collect();
    let column = |name: &str| columns.iter().position(|c| c == name);

    let bad = |line: usize, reason: String| SetupError::BadStationRow {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let required = ["network", "station", "latitude", "longitude", "elevation"];
    let mut idx = [0usize; 5];
    for (slot, name) in idx.iter_mut().zip(required) {
        *slot = column(name).ok_or_else(|| bad(1, format!("missing column '{}'", name)))?;
    }
    let [net, sta, lat, lon, elev] = idx;
    let loc = column("location");

    let mut stations = Vec::new();
    for (n, line) in lines {
        let line_no = n + 1;
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |i: usize| {
            fields
                .get(i)
                .copied()
                .ok_or_else(|| bad(line_no, format!("expected at least {} fields", i + 1)))
        };
        let number = |i: usize| -> Result<f64, SetupError> {
            let raw = field(i)?;
            raw.parse::<f64>()
                .map_err(|_| bad(line_no, format!("'{}' is not a number", raw)))
        };

        let location = match loc {
            Some(i) => fields.get(i).copied().unwrap_or(""),
            None => "",
        };
        stations.push(StationLocation {
            id: StationId::new(field(net)?, field(sta)?, location),
            latitude: number(lat)?,
            longitude: number(lon)?,
            elevation: number(elev)?,
        });
    }

    if stations.is_empty() {
        return Err(SetupError::EmptyStationTable(path.to_path_buf()));
    }
    Ok(stations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_location_column() {
        let text = "network,station,location,latitude,longitude,elevation\n\
                    NZ,WEL,10,-41.28,174.77,138\n\
                    \n\
                    NZ,BFZ,,-40.68,176.24,283\n";
        let stations = parse_station_table(Path::new("locations.txt"), text).unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].id.to_string(), "NZ.WEL.10");
        assert_eq!(stations[1].id.location, "00");
        assert_eq!(stations[1].elevation, 283.0);
    }

    #[test]
    fn test_header_only_is_empty() {
        let text = "network,station,latitude,longitude,elevation\n";
        assert!(matches!(
            parse_station_table(Path::new("t"), text),
            Err(SetupError::EmptyStationTable(_))
        ));
    }

    #[test]
    fn test_bad_number_reports_line() {
        let text = "network,station,latitude,longitude,elevation\nNZ,WEL,north,174.77,138\n";
        match parse_station_table(Path::new("t"), text) {
            Err(SetupError::BadStationRow { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
