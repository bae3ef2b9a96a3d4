use bytesize::ByteSize;
use csref::ResourceSnapshot;
use csref::compare::{DiffMagnitude, Divergence, LaneDiff, Side};
use std::fmt::Write as _;
use std::path::Path;
use tabled::builder::Builder;
use tabled::settings::object::Rows;
use tabled::settings::{Alignment, Modify, Style};

/// Rows shown per table before the remainder is summarized.
const MAX_ROWS: usize = 10;

fn finish(builder: Builder, total: usize) -> String {
    let mut table = builder.build();
    table
        .with(Style::modern())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    let mut result = table.to_string();
    if total > MAX_ROWS {
        let last_line_width = result.lines().last().map_or(0, |l| l.chars().count());
        result.push_str(&format!(
            "\n{:>width$}",
            format!("... {} more differences", total - MAX_ROWS),
            width = last_line_width
        ));
    }
    result
}

fn magnitude(m: DiffMagnitude, float: bool) -> String {
    match m {
        DiffMagnitude::Numeric(val) if float => format!("{val:.3e}"),
        DiffMagnitude::Numeric(val) => format!("{}", val as u64),
        DiffMagnitude::Incomparable => "N/A".to_string(),
    }
}

/// Lane diffs of one resource. Lanes are labelled `element.component`.
pub fn format_lanes(diffs: &[LaneDiff], lane_type: &str, width: usize, side1: &str, side2: &str) -> String {
    let float = lane_type == "F32";
    let mut builder = Builder::default();
    if float {
        builder.push_record(["#", side1, side2, "Δ abs", "Δ %"]);
    } else {
        builder.push_record(["#", side1, side2, "Δ"]);
    }
    for d in diffs.iter().take(MAX_ROWS) {
        let label = if width > 1 {
            format!("{}.{}", d.lane / width, ["x", "y", "z", "w"][d.lane % width.min(4)])
        } else {
            d.lane.to_string()
        };
        let mut row = vec![label, d.expected.clone(), d.observed.clone(), magnitude(d.absolute, float)];
        if float {
            row.push(match d.relative {
                DiffMagnitude::Numeric(val) => format!("{:.2}%", val * 100.0),
                DiffMagnitude::Incomparable => "N/A".to_string(),
            });
        }
        builder.push_record(row);
    }
    finish(builder, diffs.len())
}

/// Every divergence, lane tables first per resource, then one table for
/// the rest.
pub fn format_divergences(divergences: &[Divergence], side1: &str, side2: &str) -> String {
    let mut report = String::new();
    let mut others = Vec::new();
    for divergence in divergences {
        match divergence {
            Divergence::Lanes {
                resource,
                lane_type,
                width,
                diffs,
            } => {
                let _ = writeln!(report, "{resource} ({lane_type}, {} lane(s) differ)", diffs.len());
                let _ = writeln!(report, "{}\n", format_lanes(diffs, lane_type, *width, side1, side2));
            }
            Divergence::Missing {
                resource,
                absent_from,
            } => {
                let (e, o) = match absent_from {
                    Side::Expected => ("--".to_string(), "present".to_string()),
                    Side::Observed => ("present".to_string(), "--".to_string()),
                };
                others.push([resource.to_string(), e, o]);
            }
            Divergence::Shape {
                resource,
                expected,
                observed,
            } => others.push([resource.to_string(), expected.clone(), observed.clone()]),
            Divergence::Expectation {
                target,
                expected,
                observed,
            } => others.push([target.clone(), expected.clone(), observed.clone()]),
        }
    }
    if !others.is_empty() {
        let mut builder = Builder::default();
        builder.push_record(["", side1, side2]);
        let total = others.len();
        for row in others.into_iter().take(MAX_ROWS) {
            builder.push_record(row);
        }
        report.push_str(&finish(builder, total));
        report.push('\n');
    }
    report
}

/// One row per resource: binding, name, type and size.
pub fn format_summary(snapshot: &ResourceSnapshot) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Binding", "Name", "Type", "Extent", "Size"]);
    for (binding, buffer) in &snapshot.buffers {
        builder.push_record([
            format!("buffer {binding}"),
            buffer.name.clone(),
            buffer.element.to_string(),
            buffer.len().to_string(),
            ByteSize::b(buffer.lanes.len() as u64 * 4).to_string(),
        ]);
    }
    for (binding, image) in &snapshot.images {
        builder.push_record([
            format!("image {binding}"),
            image.name.clone(),
            image.format.to_string(),
            format!("{}x{}", image.width, image.height),
            ByteSize::b(image.texels.len() as u64).to_string(),
        ]);
    }
    let mut table = builder.build();
    table
        .with(Style::modern())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    table.to_string()
}

pub fn format_diagnostics(snapshot: &ResourceSnapshot) -> Option<String> {
    if snapshot.diagnostics.is_empty() {
        return None;
    }
    let mut builder = Builder::default();
    builder.push_record(["Kind", "Count", "First", "Message"]);
    for d in snapshot.diagnostics.iter() {
        builder.push_record([
            d.kind.to_string(),
            d.occurrences.to_string(),
            d.first_invocation.to_string(),
            d.message.clone(),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::modern());
    Some(table.to_string())
}

/// Human-readable dump of a snapshot: one line per buffer element and per
/// image texel.
pub fn write_human_readable(snapshot: &ResourceSnapshot, path: &Path) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    writeln!(file, "# {}", snapshot.fixture)?;
    for (binding, buffer) in &snapshot.buffers {
        writeln!(
            file,
            "\n## buffer {binding} `{}`: {} x {} ({})",
            buffer.name,
            buffer.len(),
            buffer.element,
            ByteSize::b(buffer.lanes.len() as u64 * 4)
        )?;
        for i in 0..buffer.len() {
            if let Some(value) = buffer.element(i) {
                writeln!(file, "{i}: {value}")?;
            }
        }
    }
    for (binding, image) in &snapshot.images {
        writeln!(
            file,
            "\n## image {binding} `{}`: {}x{} {} ({})",
            image.name,
            image.width,
            image.height,
            image.format,
            ByteSize::b(image.texels.len() as u64)
        )?;
        for y in 0..image.height {
            for x in 0..image.width {
                if let Some(value) = image.texel(x, y) {
                    writeln!(file, "({x}, {y}): {value}")?;
                }
            }
        }
    }
    for d in snapshot.diagnostics.iter() {
        writeln!(file, "\n! {} x{}: {}", d.kind, d.occurrences, d.message)?;
    }
    file.flush()
}
