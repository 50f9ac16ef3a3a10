use std::path::PathBuf;

use prwarden_core::{ReviewFinding, Severity, WardenError};
use serde::Deserialize;

use crate::transport::{AnalysisOptions, AnalysisResponse};

const SYSTEM_PROMPT: &str = "\
You are an expert code reviewer. Your job is to find genuine bugs, \
security issues, and significant problems in the code changes of a pull request.

Rules:
- Only comment on issues you are confident about
- Reference line numbers from the new version of the file when you can
- Do not speculate about code behavior you cannot verify
- Do not comment on style or formatting unless it creates a bug
- Use a finding without \"file\" for remarks about the change as a whole

Respond with a JSON object:
{
  \"findings\": [
    {
      \"file\": \"path/to/file.py\",
      \"line\": 42,
      \"severity\": \"bug\" | \"warning\" | \"suggestion\" | \"info\",
      \"message\": \"Clear explanation of the issue\"
    }
  ]
}

If you find no issues, return: { \"findings\": [] }
If you cannot analyze the input, return: { \"findings\": [], \"error\": \"reason\" }";

/// Build the system prompt for the analysis model.
///
/// # Examples
///
/// ```
/// use prwarden_review::prompt::build_system_prompt;
///
/// let prompt = build_system_prompt();
/// assert!(prompt.contains("findings"));
/// ```
pub fn build_system_prompt() -> String {
    SYSTEM_PROMPT.to_string()
}

/// Build the user prompt containing the diff chunk to review.
///
/// # Examples
///
/// ```
/// use prwarden_review::prompt::build_review_prompt;
/// use prwarden_review::transport::AnalysisOptions;
///
/// let prompt = build_review_prompt("+new line", &AnalysisOptions::default());
/// assert!(prompt.contains("+new line"));
/// ```
pub fn build_review_prompt(diff: &str, options: &AnalysisOptions) -> String {
    let mut prompt = format!("Review the following code changes:\n\n```diff\n{diff}\n```\n");
    if let Some(max) = options.max_findings {
        prompt.push_str(&format!(
            "\nReport at most {max} findings, most important first.\n"
        ));
    }
    prompt
}

#[derive(Deserialize)]
struct WireResponse {
    findings: Vec<WireFinding>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct WireFinding {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<serde_json::Value>,
    severity: String,
    message: String,
}

/// Validate the model's answer against the expected `{findings, error?}` shape.
///
/// Markdown code fences around the JSON are tolerated.
///
/// # Errors
///
/// Returns [`WardenError::MalformedResponse`] if the text is not JSON of the
/// expected shape, a severity is unknown, a line reference is not a
/// non-negative integer, or a message is blank.
///
/// # Examples
///
/// ```
/// use prwarden_review::prompt::parse_analysis_response;
///
/// let response = parse_analysis_response(r#"{"findings":[]}"#).unwrap();
/// assert!(response.findings.is_empty());
/// assert!(parse_analysis_response("not json").is_err());
/// ```
pub fn parse_analysis_response(content: &str) -> Result<AnalysisResponse, WardenError> {
    let cleaned = strip_code_fences(content);
    let wire: WireResponse = serde_json::from_str(cleaned)
        .map_err(|e| WardenError::MalformedResponse(format!("unexpected response shape: {e}")))?;

    let findings = wire
        .findings
        .into_iter()
        .enumerate()
        .map(|(i, f)| convert_finding(i, f))
        .collect::<Result<Vec<_>, _>>()?;

    let error = wire.error.filter(|e| !e.trim().is_empty());
    Ok(AnalysisResponse { findings, error })
}

fn convert_finding(index: usize, wire: WireFinding) -> Result<ReviewFinding, WardenError> {
    let severity: Severity = wire
        .severity
        .parse()
        .map_err(|e| WardenError::MalformedResponse(format!("finding {index}: {e}")))?;

    let line = match wire.line {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Number(n)) => match n.as_u64() {
            Some(0) => None,
            Some(l) => Some(u32::try_from(l).map_err(|_| {
                WardenError::MalformedResponse(format!("finding {index}: line {l} out of range"))
            })?),
            None => {
                return Err(WardenError::MalformedResponse(format!(
                    "finding {index}: invalid line {n}"
                )))
            }
        },
        Some(serde_json::Value::String(s)) => {
            let parsed: u32 = s.trim().parse().map_err(|_| {
                WardenError::MalformedResponse(format!("finding {index}: invalid line {s:?}"))
            })?;
            (parsed != 0).then_some(parsed)
        }
        Some(other) => {
            return Err(WardenError::MalformedResponse(format!(
                "finding {index}: invalid line {other}"
            )))
        }
    };

    let message = wire.message.trim().to_string();
    if message.is_empty() {
        return Err(WardenError::MalformedResponse(format!(
            "finding {index}: empty message"
        )));
    }

    let file = wire
        .file
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .map(PathBuf::from);

    Ok(ReviewFinding {
        file,
        line,
        severity,
        message,
    })
}

fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_describes_response_shape() {
        let prompt = build_system_prompt();
        assert!(prompt.contains("\"findings\""));
        assert!(prompt.contains("\"error\""));
    }

    #[test]
    fn review_prompt_includes_diff_and_limit() {
        let prompt = build_review_prompt(
            "+added line",
            &AnalysisOptions {
                max_findings: Some(4),
            },
        );
        assert!(prompt.contains("```diff\n+added line"));
        assert!(prompt.contains("at most 4 findings"));
    }

    #[test]
    fn review_prompt_without_limit() {
        let prompt = build_review_prompt("+x", &AnalysisOptions::default());
        assert!(!prompt.contains("at most"));
    }

    #[test]
    fn parse_valid_response() {
        let json = r#"{
            "findings": [
                {"file": "src/auth.py", "line": 42, "severity": "bug", "message": "Null dereference"},
                {"severity": "info", "message": "Large change, consider splitting"},
                {"file": "src/db.py", "line": "7", "severity": "Warning", "message": "SQL injection risk"}
            ]
        }"#;
        let response = parse_analysis_response(json).unwrap();
        assert_eq!(response.findings.len(), 3);
        assert_eq!(response.findings[0].line, Some(42));
        assert_eq!(response.findings[0].severity, Severity::Bug);
        assert!(response.findings[1].is_diff_wide());
        assert_eq!(response.findings[2].line, Some(7));
        assert_eq!(response.findings[2].severity, Severity::Warning);
        assert_eq!(response.error, None);
    }

    #[test]
    fn parse_with_code_fences() {
        let fenced = "```json\n{\"findings\":[]}\n```";
        let response = parse_analysis_response(fenced).unwrap();
        assert!(response.findings.is_empty());
    }

    #[test]
    fn parse_reports_service_error() {
        let response =
            parse_analysis_response(r#"{"findings":[],"error":"input too large"}"#).unwrap();
        assert_eq!(response.error.as_deref(), Some("input too large"));

        let blank = parse_analysis_response(r#"{"findings":[],"error":"  "}"#).unwrap();
        assert_eq!(blank.error, None);
    }

    #[test]
    fn zero_or_null_line_means_no_line() {
        let json = r#"{"findings":[
            {"file":"a.py","line":0,"severity":"info","message":"x"},
            {"file":"a.py","line":null,"severity":"info","message":"y"},
            {"file":"a.py","line":"0","severity":"info","message":"z"}
        ]}"#;
        let response = parse_analysis_response(json).unwrap();
        assert!(response.findings.iter().all(|f| f.line.is_none()));
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        let cases = [
            "this is not json at all",
            r#"{"comments":[]}"#,
            r#"{"findings":[{"file":"a.py","severity":"bug"}]}"#,
            r#"{"findings":[{"severity":"blocker","message":"x"}]}"#,
            r#"{"findings":[{"severity":"bug","message":"x","line":-3}]}"#,
            r#"{"findings":[{"severity":"bug","message":"x","line":[1]}]}"#,
            r#"{"findings":[{"severity":"bug","message":"   "}]}"#,
        ];
        for case in cases {
            let err = parse_analysis_response(case).unwrap_err();
            assert!(
                matches!(err, WardenError::MalformedResponse(_)),
                "expected malformed for {case}"
            );
        }
    }

    #[test]
    fn blank_file_is_diff_wide() {
        let json = r#"{"findings":[{"file":"  ","severity":"info","message":"x"}]}"#;
        let response = parse_analysis_response(json).unwrap();
        assert!(response.findings[0].is_diff_wide());
    }
}
