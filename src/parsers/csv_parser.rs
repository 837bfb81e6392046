use crate::config::PipelineConfig;
use crate::data_models::{
    required_columns, InputRecord, RawRecord, Variable, IMAGE_DISAPPEARED, LATITUDE, ELEVATION,
    DISTANCE_TO_WATER, MEASURED_ON, SITE_ID, TRANSPARENCY_SOURCE,
};
use crate::errors::ParseError;
use crate::utils::{parse_bool_like, parse_locale_float, parse_measurement_date};
use csv::ReaderBuilder;
use log::{debug, info};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Reads the observation file at `file_path` into typed records.
pub fn parse_csv(
    config: &PipelineConfig,
    file_path: &Path,
) -> Result<Vec<InputRecord>, ParseError> {
    info!("Reading observations from {}", file_path.display());
    let file = File::open(file_path).map_err(|e| ParseError::IoError {
        path: file_path.to_path_buf(),
        source: e,
    })?;
    read_records(config, file)
}

/// Reads delimited observations from any reader. The whole input is rejected on
/// the first schema or row error; no partial table is returned.
pub fn read_records<R: Read>(
    config: &PipelineConfig,
    input: R,
) -> Result<Vec<InputRecord>, ParseError> {
    let delimiter = delimiter_byte(&config.delimiter)?;

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| ParseError::HeaderReadError { source: e })?
        .clone();
    check_schema(headers.iter())?;

    let mut records = Vec::new();
    for (row_id, result) in reader.deserialize::<RawRecord>().enumerate() {
        let raw = result.map_err(|e| ParseError::MalformedRecord {
            row: row_id + 1,
            source: e,
        })?;
        records.push(type_record(config, row_id, raw)?);
    }
    debug!("Parsed {} data rows", records.len());
    Ok(records)
}

/// The field delimiter as the single byte the reader needs.
pub fn delimiter_byte(delimiter: &str) -> Result<u8, ParseError> {
    match delimiter.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => Err(ParseError::InvalidDelimiter {
            delimiter: delimiter.to_string(),
        }),
    }
}

/// Fails when any required header is absent. Extra headers are tolerated.
pub fn check_schema<'a, I>(headers: I) -> Result<(), ParseError>
where
    I: IntoIterator<Item = &'a str>,
{
    let present: HashSet<&str> = headers.into_iter().map(str::trim).collect();
    let required = required_columns();
    let missing: Vec<String> = required
        .iter()
        .filter(|c| !present.contains(*c))
        .map(|c| c.to_string())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    let mut extra: Vec<String> = present
        .iter()
        .filter(|h| !required.contains(*h))
        .map(|h| h.to_string())
        .collect();
    extra.sort();
    Err(ParseError::SchemaMismatch { missing, extra })
}

fn non_null<'a>(config: &PipelineConfig, cell: Option<&'a str>) -> Option<&'a str> {
    cell.filter(|v| !config.is_null_marker(v)).map(str::trim)
}

fn number(
    config: &PipelineConfig,
    row_id: usize,
    column: &str,
    cell: Option<&str>,
) -> Result<Option<f64>, ParseError> {
    match non_null(config, cell) {
        None => Ok(None),
        Some(text) => parse_locale_float(text)
            .map(Some)
            .map_err(|_| ParseError::InvalidValue {
                row: row_id + 1,
                column: column.to_string(),
                value: text.to_string(),
            }),
    }
}

fn text(config: &PipelineConfig, cell: Option<String>) -> Option<String> {
    cell.filter(|v| !config.is_null_marker(v))
}

fn type_record(
    config: &PipelineConfig,
    row_id: usize,
    raw: RawRecord,
) -> Result<InputRecord, ParseError> {
    let site_id = non_null(config, raw.site_id.as_deref())
        .map(str::to_string)
        .ok_or_else(|| ParseError::MissingField {
            row: row_id + 1,
            column: SITE_ID.to_string(),
        })?;

    let date_text = non_null(config, raw.measured_on.as_deref()).ok_or_else(|| {
        ParseError::MissingField {
            row: row_id + 1,
            column: MEASURED_ON.to_string(),
        }
    })?;
    let measured_on = parse_measurement_date(date_text).map_err(|e| ParseError::DateParseError {
        row: row_id + 1,
        value: date_text.to_string(),
        message: e.to_string(),
    })?;

    let mut alternatives = [[None; 2]; 7];
    for var in Variable::ALL {
        for (slot, source) in var.sources().iter().enumerate() {
            alternatives[var.index()][slot] =
                number(config, row_id, source.column, raw.alternative(source.column))?;
        }
    }

    let image_disappeared = match non_null(config, raw.transparency_image_disappeared.as_deref()) {
        None => None,
        Some(flag) => Some(parse_bool_like(flag).ok_or_else(|| ParseError::InvalidValue {
            row: row_id + 1,
            column: IMAGE_DISAPPEARED.to_string(),
            value: flag.to_string(),
        })?),
    };

    Ok(InputRecord {
        row_id,
        site_id,
        measured_on,
        latitude: number(config, row_id, LATITUDE, raw.latitude.as_deref())?,
        elevation: number(config, row_id, ELEVATION, raw.elevation.as_deref())?,
        distance_to_water_m: number(
            config,
            row_id,
            DISTANCE_TO_WATER,
            raw.distance_to_water_m.as_deref(),
        )?,
        water_body_type: text(config, raw.water_body_type),
        bank_material: text(config, raw.bank_material),
        bedrock: text(config, raw.bedrock),
        water_body_source: text(config, raw.water_body_source),
        freshwater_habitats: text(config, raw.freshwater_habitats),
        saltwater_habitats: text(config, raw.saltwater_habitats),
        alternatives,
        transparency_tube_cm: number(
            config,
            row_id,
            TRANSPARENCY_SOURCE,
            raw.transparency_tube_cm.as_deref(),
        )?,
        image_disappeared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn header() -> String {
        required_columns().join(",")
    }

    fn row(overrides: &[(&str, &str)]) -> String {
        required_columns()
            .iter()
            .map(|c| {
                overrides
                    .iter()
                    .find(|(k, _)| k == c)
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_else(|| match *c {
                        "site_id" => "S1".to_string(),
                        "measured_on" => "2020-05-01".to_string(),
                        "latitude" => "40.1".to_string(),
                        "elevation" => "120".to_string(),
                        _ => String::new(),
                    })
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    fn read(body: &str) -> Result<Vec<InputRecord>, ParseError> {
        read_records(&PipelineConfig::default(), body.as_bytes())
    }

    #[test]
    fn reads_typed_values_and_null_markers() {
        let input = format!(
            "{}\n{}\n",
            header(),
            row(&[
                ("ph_meter", "\"7,2\""),
                ("ph_paper", "NA"),
                ("transparency_tube_cm", "45"),
                ("transparency_image_disappeared", "yes"),
                ("water_body_type", " Lake "),
            ])
        );
        let records = read(&input).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.row_id, 0);
        assert_eq!(rec.alternatives_for(Variable::Ph), [Some(7.2), None]);
        assert_eq!(rec.transparency_tube_cm, Some(45.0));
        assert_eq!(rec.image_disappeared, Some(true));
        assert_eq!(rec.water_body_type.as_deref(), Some(" Lake "));
        assert_eq!(rec.latitude, Some(40.1));
    }

    #[test]
    fn missing_column_is_schema_mismatch() {
        let header: Vec<&str> = required_columns()
            .into_iter()
            .filter(|c| *c != "ph_paper")
            .chain(std::iter::once("comments"))
            .collect();
        let err = read(&format!("{}\n", header.join(","))).unwrap_err();
        match err {
            ParseError::SchemaMismatch { missing, extra } => {
                assert_eq!(missing, vec!["ph_paper".to_string()]);
                assert_eq!(extra, vec!["comments".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn garbage_number_is_fatal_with_row() {
        let input = format!(
            "{}\n{}\n{}\n",
            header(),
            row(&[]),
            row(&[("nitrate_kit_mgl", "lots")])
        );
        let err = read(&input).unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { row: 2, .. }), "{err:?}");
    }

    #[test]
    fn bad_date_is_fatal() {
        let input = format!("{}\n{}\n", header(), row(&[("measured_on", "May 1st")]));
        assert!(matches!(read(&input), Err(ParseError::DateParseError { row: 1, .. })));
    }

    #[test]
    fn short_row_is_malformed() {
        let input = format!("{}\nS1,2020-01-01\n", header());
        assert!(matches!(read(&input), Err(ParseError::MalformedRecord { row: 1, .. })));
    }

    #[test]
    fn delimiter_must_be_one_ascii_byte() {
        assert_eq!(delimiter_byte(";").unwrap(), b';');
        assert_eq!(delimiter_byte("\t").unwrap(), b'\t');
        for bad in ["", ";;", "§", "→"] {
            assert!(
                matches!(delimiter_byte(bad), Err(ParseError::InvalidDelimiter { .. })),
                "{bad:?} accepted"
            );
        }

        let mut config = PipelineConfig::default();
        config.delimiter = "§".to_string();
        let input = format!("{}\n", header());
        assert!(matches!(
            read_records(&config, input.as_bytes()),
            Err(ParseError::InvalidDelimiter { .. })
        ));
    }

    #[test]
    fn semicolon_files_are_read() {
        let mut config = PipelineConfig::default();
        config.delimiter = ";".to_string();
        let input = format!("{}\n{}\n", header(), row(&[]))
            .replace(',', ";");
        let records = read_records(&config, input.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].site_id, "S1");
    }
}
