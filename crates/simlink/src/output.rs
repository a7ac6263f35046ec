//! Output formatting: plain, table, JSON, YAML.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one `name = value` line per item.

use std::io::{self, Write};

use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use simlink_core::VariableRef;

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Printed in place of a value the simulator could not provide.
const UNAVAILABLE: &str = "n/a";

// ── Readings ─────────────────────────────────────────────────────────

/// One variable value as shown to the user.
#[derive(Debug, Serialize)]
pub struct Reading {
    pub name: String,
    pub variable: String,
    pub unit: String,
    /// `None` when the simulator gave no value.
    pub value: Option<f64>,
}

impl From<&VariableRef> for Reading {
    fn from(variable: &VariableRef) -> Self {
        Self {
            name: variable.output_name().to_owned(),
            variable: variable.name().to_owned(),
            unit: variable.unit().to_owned(),
            value: (!variable.is_unavailable()).then(|| variable.value()),
        }
    }
}

impl Reading {
    fn display_value(&self) -> String {
        self.value
            .map_or_else(|| UNAVAILABLE.to_owned(), |value| value.to_string())
    }
}

#[derive(Tabled)]
struct ReadingRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Variable")]
    variable: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Render readings in the chosen format.
pub fn render_readings(format: OutputFormat, readings: &[Reading]) -> Result<String, CliError> {
    render_list(
        format,
        readings,
        |r| ReadingRow {
            name: r.name.clone(),
            variable: r.variable.clone(),
            unit: r.unit.clone(),
            value: r.display_value(),
        },
        |r| format!("{} = {}", r.name, r.display_value()),
    )
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
///
/// - `plain`: calls `line_fn` on each item, one line per item
/// - `table`: uses the `Tabled` derive to build a pretty table
/// - `json` / `json-compact`: serializes the original data via serde
/// - `yaml`: serializes via serde_yaml
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    line_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: Serialize,
    R: Tabled,
{
    Ok(match format {
        OutputFormat::Plain => data.iter().map(line_fn).collect::<Vec<_>>().join("\n"),
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Table::new(rows).with(Style::rounded()).to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Yaml => serde_yaml::to_string(data)?,
    })
}

/// Render a single serde-serializable item in the chosen format.
///
/// Plain and table both use `detail_fn`, since single-item views don't
/// use the `Tabled` derive.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: Serialize,
{
    Ok(match format {
        OutputFormat::Plain | OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Yaml => serde_yaml::to_string(data)?,
    })
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn readings() -> Vec<Reading> {
        vec![
            Reading::from(
                &VariableRef::new("PLANE ALTITUDE", "feet")
                    .with_alias("alt")
                    .with_value(3500.0),
            ),
            Reading::from(&VariableRef::new("GEAR HANDLE POSITION", "bool").unavailable()),
        ]
    }

    #[test]
    fn plain_uses_alias_and_marks_missing_values() {
        let out = render_readings(OutputFormat::Plain, &readings()).unwrap();
        assert_eq!(out, "alt = 3500\nGEAR HANDLE POSITION = n/a");
    }

    #[test]
    fn json_reports_missing_value_as_null() {
        let out = render_readings(OutputFormat::JsonCompact, &readings()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["value"], 3500.0);
        assert!(parsed[1]["value"].is_null());
        assert_eq!(parsed[0]["variable"], "PLANE ALTITUDE");
    }

    #[test]
    fn table_has_headers() {
        let out = render_readings(OutputFormat::Table, &readings()).unwrap();
        assert!(out.contains("Name"));
        assert!(out.contains("n/a"));
    }
}
