//! Output formatters for descriptors and records.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use relcontent_core::descriptor::{ContentDescriptor, DescriptorBuild, Field, FieldId, FieldKind};
use relcontent_core::RecordSet;
use relcontent_proto::{ContentRecord, DisplayValue, RecordValue};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a descriptor and its diagnostics.
    fn format_descriptor(&self, build: &DescriptorBuild) -> String;

    /// Format built records.
    fn format_records(&self, descriptor: &ContentDescriptor, set: &RecordSet) -> String;

    /// Format an error message.
    fn format_error(&self, error: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_descriptor(&self, build: &DescriptorBuild) -> String {
        let descriptor = &build.descriptor;
        let mut table = Table::new();
        table.set_header(vec!["Field", "Name", "Kind", "Category", "Priority"]);

        for (depth, field) in walk(descriptor) {
            table.add_row(vec![
                Cell::new(format!("{}{}", "  ".repeat(depth), field.label)),
                Cell::new(&field.name),
                Cell::new(kind_name(field)),
                Cell::new(&field.category),
                Cell::new(field.priority),
            ]);
        }

        let mut output = format!("{}\n{} field(s)", table, descriptor.len());
        for diagnostic in &build.diagnostics {
            output.push_str(&format!("\nwarning: {}", diagnostic));
        }
        output
    }

    fn format_records(&self, descriptor: &ContentDescriptor, set: &RecordSet) -> String {
        let roots: Vec<&Field> = descriptor
            .roots()
            .iter()
            .filter_map(|&id| descriptor.field(id))
            .collect();

        let mut table = Table::new();
        let mut headers = vec![Cell::new("Instance")];
        headers.extend(roots.iter().map(|f| Cell::new(&f.label)));
        table.set_header(headers);

        for record in &set.records {
            let mut cells = vec![Cell::new(format_keys(record))];
            for field in &roots {
                cells.push(Cell::new(cell_text(record, &field.name)));
            }
            table.add_row(cells);
        }

        let mut output = format!("{}\n{} record(s)", table, set.len());
        for record in &set.records {
            for error in &record.errors {
                output.push_str(&format!("\nerror in {}: {}", format_keys(record), error));
            }
        }
        for error in &set.errors {
            output.push_str(&format!("\nerror: {}", error));
        }
        output
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}", error)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_descriptor(&self, build: &DescriptorBuild) -> String {
        let diagnostics: Vec<String> = build.diagnostics.iter().map(ToString::to_string).collect();
        let output = serde_json::json!({
            "descriptor": build.descriptor,
            "diagnostics": diagnostics,
        });
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_records(&self, _descriptor: &ContentDescriptor, set: &RecordSet) -> String {
        let output = serde_json::json!({
            "records": set.records,
            "errors": set.errors,
        });
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({
            "error": error
        })
        .to_string()
    }
}

/// CSV formatter. Nested content is summarized.
pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn format_descriptor(&self, build: &DescriptorBuild) -> String {
        let mut output = String::from("name,label,kind,category,priority,parent\n");
        for (_, field) in walk(&build.descriptor) {
            let parent = field
                .parent
                .and_then(|p| build.descriptor.field(p))
                .map(|p| p.name.as_str())
                .unwrap_or("");
            output.push_str(&format!(
                "{},\"{}\",{},\"{}\",{},{}\n",
                field.name,
                escape_csv(&field.label),
                kind_name(field),
                escape_csv(&field.category),
                field.priority,
                parent
            ));
        }
        output
    }

    fn format_records(&self, descriptor: &ContentDescriptor, set: &RecordSet) -> String {
        let roots: Vec<&Field> = descriptor
            .roots()
            .iter()
            .filter_map(|&id| descriptor.field(id))
            .collect();

        let mut headers = vec!["instance".to_string()];
        headers.extend(roots.iter().map(|f| f.name.clone()));
        let mut output = headers.join(",");
        output.push('\n');

        for record in &set.records {
            let mut cells = vec![format!("\"{}\"", format_keys(record))];
            for field in &roots {
                cells.push(format!("\"{}\"", escape_csv(&cell_text(record, &field.name))));
            }
            output.push_str(&cells.join(","));
            output.push('\n');
        }
        output
    }

    fn format_error(&self, error: &str) -> String {
        format!("error\n\"{}\"", escape_csv(error))
    }
}

/// Fields in display order with their nesting depth.
fn walk(descriptor: &ContentDescriptor) -> Vec<(usize, &Field)> {
    fn visit<'d>(descriptor: &'d ContentDescriptor, ids: &[FieldId], depth: usize, out: &mut Vec<(usize, &'d Field)>) {
        for &id in ids {
            let Some(field) = descriptor.field(id) else { continue };
            out.push((depth, field));
            visit(descriptor, field.children(), depth + 1, out);
        }
    }

    let mut out = Vec::with_capacity(descriptor.len());
    visit(descriptor, descriptor.roots(), 0, &mut out);
    out
}

fn kind_name(field: &Field) -> &'static str {
    match field.kind {
        FieldKind::Properties(_) => "properties",
        FieldKind::Nested(_) => "nested",
    }
}

fn format_keys(record: &ContentRecord) -> String {
    record
        .primary_keys
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Display text of a top-level value.
fn cell_text(record: &ContentRecord, name: &str) -> String {
    if let Some(DisplayValue::Text(text)) = record.display(name) {
        return text.clone();
    }
    match record.value(name) {
        None => String::new(),
        Some(value) if value.is_null() => "NULL".to_string(),
        Some(RecordValue::Scalar(v)) => v.to_string(),
        Some(RecordValue::Array(items)) => format!("[{} item(s)]", items.len()),
        Some(RecordValue::Struct(_)) => "[1 item]".to_string(),
    }
}

/// Escape a string for CSV.
fn escape_csv(s: &str) -> String {
    s.replace('"', "\"\"")
}
