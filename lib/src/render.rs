//! Turns a decoded record into report text.
//!
//! The text format is ASN.1 value notation laid out to a fixed width: a
//! value that fits on the rest of its line is printed flat, anything larger
//! puts one component per line. The same record always renders the same way,
//! so reports from successive runs diff cleanly.

use std::fmt;

use ber_schema::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub format: ReportFormat,
    pub width: usize,
    pub indent: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            format: ReportFormat::Text,
            width: 80,
            indent: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport(String);

impl RenderedReport {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RenderedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn render(value: &Value) -> RenderedReport {
    render_text(value, &RenderOptions::default())
}

pub fn render_with(
    value: &Value,
    options: &RenderOptions,
) -> Result<RenderedReport, serde_json::Error> {
    match options.format {
        ReportFormat::Text => Ok(render_text(value, options)),
        ReportFormat::Json => {
            let mut json = serde_json::to_string_pretty(value)?;
            json.push('\n');
            Ok(RenderedReport(json))
        }
    }
}

fn render_text(value: &Value, options: &RenderOptions) -> RenderedReport {
    let printer = Printer {
        width: options.width,
        step: options.indent,
    };
    let mut out = String::new();
    printer.write(value, 0, 0, &mut out);
    out.push('\n');
    RenderedReport(out)
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// The single-line form of `value`
pub fn flat(value: &Value) -> String {
    match value {
        Value::Boolean(true) => "TRUE".to_string(),
        Value::Boolean(false) => "FALSE".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Enumerated(label) => label.clone(),
        Value::Null => "NULL".to_string(),
        Value::OctetString(bytes) | Value::Any(bytes) => format!("'{}'H", hex_upper(bytes)),
        Value::BitString(bits) => {
            let digits: String = bits.iter().map(|bit| if *bit { '1' } else { '0' }).collect();
            format!("'{digits}'B")
        }
        Value::ObjectIdentifier(arcs) => {
            let arcs: Vec<String> = arcs.iter().map(u64::to_string).collect();
            format!("{{ {} }}", arcs.join(" "))
        }
        Value::String(text) | Value::Time(text) => quote(text),
        Value::Sequence(fields) if fields.is_empty() => "{}".to_string(),
        Value::Sequence(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(name, value)| format!("{name} {}", flat(value)))
                .collect();
            format!("{{ {} }}", fields.join(", "))
        }
        Value::Choice(alternative, value) => format!("{alternative} : {}", flat(value)),
        Value::List(items) if items.is_empty() => "{}".to_string(),
        Value::List(items) => {
            let items: Vec<String> = items.iter().map(flat).collect();
            format!("{{ {} }}", items.join(", "))
        }
    }
}

struct Printer {
    width: usize,
    step: usize,
}

impl Printer {
    // writes `value` starting at `column`, with continuation lines indented
    // by `indent`
    fn write(&self, value: &Value, indent: usize, column: usize, out: &mut String) {
        let single = flat(value);
        if column + single.len() <= self.width {
            out.push_str(&single);
            return;
        }
        match value {
            Value::Sequence(fields) if !fields.is_empty() => {
                self.write_block(
                    fields.iter().map(|(name, value)| (Some(name.as_str()), value)),
                    indent,
                    out,
                );
            }
            Value::List(items) if !items.is_empty() => {
                self.write_block(items.iter().map(|item| (None, item)), indent, out);
            }
            Value::Choice(alternative, inner) => {
                out.push_str(alternative);
                out.push_str(" : ");
                self.write(inner, indent, column + alternative.len() + 3, out);
            }
            // leaves don't break
            _ => out.push_str(&single),
        }
    }

    fn write_block<'v>(
        &self,
        entries: impl ExactSizeIterator<Item = (Option<&'v str>, &'v Value)>,
        indent: usize,
        out: &mut String,
    ) {
        let inner = indent + self.step;
        let count = entries.len();
        out.push('{');
        for (i, (name, value)) in entries.enumerate() {
            out.push('\n');
            out.push_str(&" ".repeat(inner));
            let mut column = inner;
            if let Some(name) = name {
                out.push_str(name);
                out.push(' ');
                column += name.len() + 1;
            }
            self.write(value, inner, column, out);
            if i + 1 < count {
                out.push(',');
            }
        }
        out.push('\n');
        out.push_str(&" ".repeat(indent));
        out.push('}');
    }
}
