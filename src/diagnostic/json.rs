use super::Diagnostic;
use crate::ast::SourceMap;

/// One JSON object per diagnostic, on a single line.
pub fn render(d: &Diagnostic) -> String {
    let mut obj = serde_json::json!({
        "severity": "error",
        "phase": d.phase.as_str(),
        "message": d.message,
        "notes": d.notes,
    });

    if let Some(label) = &d.label {
        let mut span = serde_json::json!({
            "start": label.span.start,
            "end": label.span.end,
            "message": label.message,
        });
        if let Some(source) = d.source.as_deref() {
            let (line, col) = SourceMap::new(source).lookup(source, label.span.start);
            span["line"] = serde_json::Value::from(line);
            span["col"] = serde_json::Value::from(col);
        }
        obj["label"] = span;
    }

    if let Some(s) = &d.suggestion {
        obj["suggestion"] = serde_json::Value::String(s.clone());
    }

    serde_json::to_string(&obj)
        .unwrap_or_else(|_| r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string())
}
