//! Prompts for field extraction and field detection.
//!
//! Keeping every prompt here means tests can inspect them directly and a
//! wording change touches one file. Callers can replace the extraction
//! system prompt via [`crate::config::BatchConfig::system_prompt`]; the
//! per-request instruction (field list + hints) is always generated.

use crate::registry::Region;
use std::fmt::Write as _;

/// Default system prompt for reading field values off a document image.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a meticulous data-entry clerk reading scanned business documents.

You receive one page image and a list of named fields. Each field gives the
rectangle where its value is printed, as percentages of the image width and
height measured from the top-left corner.

Rules:
1. Read the text inside each rectangle. If the value spills slightly outside
   the rectangle, include the whole value.
2. Copy values exactly as printed: keep number formats, currency symbols,
   leading zeros, and date formats. Do not translate or reformat.
3. If a rectangle is empty or unreadable, use an empty string.
4. Reply with ONE JSON object and nothing else. Its keys are exactly the
   field names given, and every value is a string.
5. Do NOT wrap the JSON in markdown fences and do NOT add commentary."#;

/// System prompt for proposing fields on a blank template.
pub const DETECTION_SYSTEM_PROMPT: &str = r#"You are a document layout analyst.

Look at the page image and find the data fields an operator would want to
extract from every document of this kind (invoice numbers, dates, totals,
names, addresses, reference codes, ...). Ignore static labels, logos and
boilerplate text; locate the VALUES.

Reply with ONE JSON array and nothing else. Each element is an object:
  {"name": "<short field name>", "x": <left>, "y": <top>, "width": <w>, "height": <h>}
where x, y, width and height are percentages (0-100) of the image width and
height, measured from the top-left corner. Order the fields top to bottom,
then left to right. Use short, unique, human-readable names. Do NOT wrap the
JSON in markdown fences."#;

/// Build the user turn for an extraction request.
pub fn extraction_instruction(regions: &[Region], hints: Option<&str>) -> String {
    let mut out = String::from("Fields:\n");
    for r in regions {
        let rect = r.rect();
        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "- {:?}: x={:.1}%, y={:.1}%, width={:.1}%, height={:.1}%",
            r.name(),
            rect.x,
            rect.y,
            rect.width,
            rect.height
        );
    }
    push_hints(&mut out, hints);
    out
}

/// Build the user turn for a detection request.
pub fn detection_instruction(hints: Option<&str>) -> String {
    let mut out = String::from("Propose the fields for this document.");
    push_hints(&mut out, hints);
    out
}

fn push_hints(out: &mut String, hints: Option<&str>) {
    if let Some(h) = hints.map(str::trim).filter(|h| !h.is_empty()) {
        out.push_str("\nOperator notes (follow them when they apply):\n");
        out.push_str(h);
        out.push('\n');
    }
}
