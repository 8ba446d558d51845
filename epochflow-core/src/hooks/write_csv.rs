//! Append one CSV row of epoch data per epoch.

use super::Hook;
use crate::error::{ConfigError, HookError};
use crate::models::Model;
use crate::types::{EpochData, MEAN_AGGREGATION, MetricValue};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What to do when a column's variable is absent from an epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnMissingVariable {
    #[default]
    Error,
    Warn,
    Default,
}

/// What to do with values that are not a single number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnUnknownValue {
    #[default]
    Default,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriteCsvArgs {
    /// File name, relative to the run output directory.
    pub output_file: String,
    pub variables: Option<Vec<String>>,
    pub delimiter: String,
    /// Written in place of missing or unsupported values.
    pub default_value: String,
    pub on_missing_variable: OnMissingVariable,
    pub on_unknown_type: OnUnknownValue,
}

impl Default for WriteCsvArgs {
    fn default() -> Self {
        Self {
            output_file: "training.csv".into(),
            variables: None,
            delimiter: ",".into(),
            default_value: String::new(),
            on_missing_variable: OnMissingVariable::Error,
            on_unknown_type: OnUnknownValue::Default,
        }
    }
}

/// Writes `epoch_id` and one `<stream>_<variable>` column per selected variable.
///
/// Columns are fixed by the first epoch written. Aggregated variables are
/// written through their `mean` (or their only aggregation).
pub struct WriteCsv {
    args: WriteCsvArgs,
    delimiter: u8,
    path: PathBuf,
    columns: Vec<(String, String)>,
    writer: Option<csv::Writer<File>>,
}

impl WriteCsv {
    pub fn new(args: WriteCsvArgs, output_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let delimiter = match args.delimiter.as_bytes() {
            [byte] => *byte,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "delimiter".into(),
                    message: format!("must be a single byte, got `{}`", args.delimiter),
                });
            }
        };
        let path = match output_dir {
            Some(dir) => dir.join(&args.output_file),
            None => PathBuf::from(&args.output_file),
        };
        Ok(Self {
            args,
            delimiter,
            path,
            columns: Vec::new(),
            writer: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_header(&mut self, epoch_data: &EpochData) -> Result<csv::Writer<File>, HookError> {
        self.columns = epoch_data
            .streams()
            .flat_map(|(stream, data)| {
                let names: Vec<String> = match &self.args.variables {
                    Some(variables) => variables.clone(),
                    None => data.keys().cloned().collect(),
                };
                names
                    .into_iter()
                    .map(move |variable| (stream.to_string(), variable))
            })
            .collect();

        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_path(&self.path)?;
        writer.write_field("epoch_id")?;
        for (stream, variable) in &self.columns {
            writer.write_field(format!("{stream}_{variable}"))?;
        }
        writer.write_record(None::<&[u8]>)?;
        debug!(path = %self.path.display(), columns = self.columns.len() + 1, "CSV header written");
        Ok(writer)
    }

    fn cell(&self, epoch_data: &EpochData, stream: &str, variable: &str) -> Result<String, HookError> {
        let value = match epoch_data.variable(stream, variable) {
            Ok(value) => value,
            Err(err) => {
                return match self.args.on_missing_variable {
                    OnMissingVariable::Error => Err(err),
                    OnMissingVariable::Warn => {
                        warn!(stream, variable, "Variable missing in epoch data");
                        Ok(self.args.default_value.clone())
                    }
                    OnMissingVariable::Default => Ok(self.args.default_value.clone()),
                };
            }
        };

        let number = match value {
            MetricValue::Scalar(value) => Some(*value),
            MetricValue::Aggregated(aggregations) => aggregations
                .get(MEAN_AGGREGATION)
                .copied()
                .or_else(|| match aggregations.values().collect::<Vec<_>>()[..] {
                    [only] => Some(*only),
                    _ => None,
                }),
            MetricValue::Array(_) => None,
        };

        match (number, self.args.on_unknown_type) {
            (Some(number), _) => Ok(number.to_string()),
            (None, OnUnknownValue::Default) => Ok(self.args.default_value.clone()),
            (None, OnUnknownValue::Warn) => {
                warn!(stream, variable, "Variable is not a single number, writing the default value");
                Ok(self.args.default_value.clone())
            }
            (None, OnUnknownValue::Error) => Err(HookError::UnsupportedValue {
                variable: variable.to_string(),
                stream: stream.to_string(),
                message: "only scalars and aggregations can be written to CSV".into(),
            }),
        }
    }
}

impl Hook for WriteCsv {
    fn after_epoch(
        &mut self,
        _model: &dyn Model,
        epoch_id: usize,
        epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => self.write_header(epoch_data)?,
        };

        let mut row = vec![epoch_id.to_string()];
        for (stream, variable) in &self.columns {
            row.push(self.cell(epoch_data, stream, variable)?);
        }
        writer.write_record(&row)?;
        writer.flush()?;
        self.writer = Some(writer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::testing::RecordingModel;
    use crate::types::StreamData;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn epoch_data() -> EpochData {
        [
            (
                "train".to_string(),
                StreamData::from([
                    ("accuracy".to_string(), MetricValue::Scalar(1.0)),
                    ("precision".to_string(), MetricValue::Array(vec![1.0; 5])),
                    ("loss".to_string(), MetricValue::mean(1.0)),
                ]),
            ),
            (
                "valid".to_string(),
                StreamData::from([
                    ("accuracy".to_string(), MetricValue::Scalar(3.0)),
                    ("precision".to_string(), MetricValue::Array(vec![3.0; 5])),
                    (
                        "loss".to_string(),
                        MetricValue::Aggregated(BTreeMap::from([("nanmean".to_string(), 3.0)])),
                    ),
                    ("specific".to_string(), MetricValue::Scalar(9.0)),
                ]),
            ),
        ]
        .into_iter()
        .collect()
    }

    fn args(variables: &[&str]) -> WriteCsvArgs {
        WriteCsvArgs {
            variables: Some(variables.iter().map(|v| v.to_string()).collect()),
            delimiter: ";".into(),
            default_value: "?".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let model = RecordingModel::default();
        let mut hook =
            WriteCsv::new(args(&["accuracy", "precision", "loss"]), Some(dir.path())).unwrap();
        hook.after_epoch(&model, 1, &epoch_data()).unwrap();
        hook.after_epoch(&model, 2, &epoch_data()).unwrap();

        let content = std::fs::read_to_string(dir.path().join("training.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "epoch_id;train_accuracy;train_precision;train_loss;valid_accuracy;valid_precision;valid_loss",
                "1;1;?;1;3;?;3",
                "2;1;?;1;3;?;3",
            ]
        );
    }

    #[test]
    fn test_missing_variable_policies() {
        let dir = TempDir::new().unwrap();
        let model = RecordingModel::default();

        let mut hook = WriteCsv::new(args(&["specific"]), Some(dir.path())).unwrap();
        assert!(matches!(
            hook.after_epoch(&model, 1, &epoch_data()),
            Err(HookError::MissingVariable { .. })
        ));

        let mut hook = WriteCsv::new(
            WriteCsvArgs {
                on_missing_variable: OnMissingVariable::Default,
                output_file: "other.csv".into(),
                ..args(&["specific"])
            },
            Some(dir.path()),
        )
        .unwrap();
        hook.after_epoch(&model, 1, &epoch_data()).unwrap();
        let content = std::fs::read_to_string(dir.path().join("other.csv")).unwrap();
        assert_eq!(content.lines().nth(1), Some("1;?;9"));
    }

    #[test]
    fn test_unknown_type_error() {
        let dir = TempDir::new().unwrap();
        let mut hook = WriteCsv::new(
            WriteCsvArgs {
                on_unknown_type: OnUnknownValue::Error,
                ..args(&["precision"])
            },
            Some(dir.path()),
        )
        .unwrap();
        assert!(matches!(
            hook.after_epoch(&RecordingModel::default(), 1, &epoch_data()),
            Err(HookError::UnsupportedValue { .. })
        ));
    }

    #[test]
    fn test_cells_containing_the_delimiter_are_quoted() {
        let dir = TempDir::new().unwrap();
        let mut hook = WriteCsv::new(
            WriteCsvArgs {
                variables: Some(vec!["loss".into(), "acc".into()]),
                default_value: "n/a, missing".into(),
                on_missing_variable: OnMissingVariable::Default,
                ..Default::default()
            },
            Some(dir.path()),
        )
        .unwrap();
        let data: EpochData = [(
            "valid".to_string(),
            StreamData::from([("loss".to_string(), MetricValue::mean(1.0))]),
        )]
        .into_iter()
        .collect();
        hook.after_epoch(&RecordingModel::default(), 1, &data).unwrap();

        let mut reader = csv::Reader::from_path(dir.path().join("training.csv")).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(header.iter().collect::<Vec<_>>(), vec!["epoch_id", "valid_loss", "valid_acc"]);
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), header.len());
        assert_eq!(&rows[0][2], "n/a, missing");
    }

    #[test]
    fn test_multi_byte_delimiter_rejected() {
        for delimiter in ["", ";;", "→"] {
            let args = WriteCsvArgs {
                delimiter: delimiter.into(),
                ..Default::default()
            };
            assert!(matches!(
                WriteCsv::new(args, None),
                Err(ConfigError::InvalidValue { key, .. }) if key == "delimiter"
            ));
        }
    }

    #[test]
    fn test_invalid_policy_rejected() {
        assert!(serde_yaml::from_str::<WriteCsvArgs>("on_missing_variable: raise").is_err());
        assert!(serde_yaml::from_str::<WriteCsvArgs>("on_unknown_type: raise").is_err());
    }
}
