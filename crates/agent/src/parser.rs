//! Response grammar parser.
//!
//! A model reply must contain one `<thought>…</thought>` block and one
//! `<action>…</action>` block. The action is a single call from the closed
//! tool vocabulary:
//!
//! ```text
//! action  = NAME "(" [arg ("," arg)*] ")"
//! arg     = NUMBER | BOOLEAN | STRING
//! STRING  = '"' … '"' | "'" … "'" | "`" … "`"     (\<quote> escapes the quote)
//! BOOLEAN = "true" | "false"
//! ```
//!
//! Parsing is a single left-to-right pass with no recursion, and input
//! longer than [`MAX_RESPONSE_LEN`] is rejected up front.

use thiserror::Error;
use webpilot_core::action::{Action, ParamType, ToolName, ToolSpec};

/// Longest reply the parser will look at, in bytes.
pub const MAX_RESPONSE_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Response too long ({len} bytes, limit {max})")]
    TooLong { len: usize, max: usize },

    #[error("Response has no <thought>...</thought> block")]
    MissingThought,

    #[error("Response has no <action>...</action> block")]
    MissingAction,

    #[error("Malformed action: {0}")]
    MalformedAction(String),

    #[error("Unknown action '{0}'")]
    InvalidActionName(String),

    #[error("{tool} takes {} argument(s), got {found}", arity_range(*.min, *.max))]
    Arity {
        tool: ToolName,
        min: usize,
        max: usize,
        found: usize,
    },

    #[error("Argument '{param}' of {tool} must be {expected}, got {found}")]
    ArgType {
        tool: ToolName,
        param: &'static str,
        expected: &'static str,
        found: String,
    },
}

fn arity_range(min: usize, max: usize) -> String {
    if min == max {
        min.to_string()
    } else {
        format!("{min} to {max}")
    }
}

/// A successfully parsed reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub thought: String,
    /// The raw text inside the action block.
    pub action_text: String,
    pub action: Action,
}

/// Parse a raw model reply.
pub fn parse_response(text: &str) -> Result<ParsedResponse, ParseError> {
    if text.len() > MAX_RESPONSE_LEN {
        return Err(ParseError::TooLong {
            len: text.len(),
            max: MAX_RESPONSE_LEN,
        });
    }
    let thought = extract_tag(text, "thought").ok_or(ParseError::MissingThought)?;
    let action_text = extract_tag(text, "action").ok_or(ParseError::MissingAction)?;
    let action = parse_action(action_text)?;
    Ok(ParsedResponse {
        thought: thought.to_string(),
        action_text: action_text.to_string(),
        action,
    })
}

/// Trimmed contents of the first `<tag>…</tag>` pair, matched case-insensitively.
pub fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    // ASCII lowering keeps byte offsets identical to `text`.
    let lower = text.to_ascii_lowercase();
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = lower.find(&open)? + open.len();
    let end = start + lower[start..].find(&close)?;
    Some(text[start..end].trim())
}

/// Parse the contents of an action block into a typed action.
pub fn parse_action(text: &str) -> Result<Action, ParseError> {
    let text = text.trim();
    let open = text
        .find('(')
        .ok_or_else(|| ParseError::MalformedAction(format!("expected name(args), got '{}'", clip(text))))?;
    if !text.ends_with(')') {
        return Err(ParseError::MalformedAction(format!(
            "missing closing parenthesis in '{}'",
            clip(text)
        )));
    }

    let name = text[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ParseError::MalformedAction(format!(
            "invalid action name '{}'",
            clip(name)
        )));
    }
    let tool = ToolName::from_name(name)
        .ok_or_else(|| ParseError::InvalidActionName(name.to_string()))?;

    let inner = &text[open + 1..text.len() - 1];
    let args = split_args(inner)?;
    let spec = tool.spec();
    if args.len() < spec.required() || args.len() > spec.params.len() {
        return Err(ParseError::Arity {
            tool,
            min: spec.required(),
            max: spec.params.len(),
            found: args.len(),
        });
    }

    let values = args
        .iter()
        .zip(spec.params)
        .map(|(arg, param)| typed(spec, param.name, param.kind, arg))
        .collect::<Result<Vec<_>, _>>()?;
    build(spec, values)
}

/// One raw argument. `quoted` means the whole argument was a single string literal.
#[derive(Debug, Clone, PartialEq)]
struct RawArg {
    text: String,
    quoted: bool,
}

fn split_args(inner: &str) -> Result<Vec<RawArg>, ParseError> {
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut args = Vec::new();
    let mut raw = String::new();
    let mut literal: Option<String> = None;
    let mut literal_count = 0usize;
    let mut chars = inner.chars().peekable();

    let finish = |raw: &mut String, literal: &mut Option<String>, count: &mut usize| {
        let trimmed = raw.trim();
        let arg = match literal.take() {
            Some(text) if *count == 1 && trimmed.is_empty() => RawArg { text, quoted: true },
            _ => RawArg {
                text: trimmed.to_string(),
                quoted: false,
            },
        };
        raw.clear();
        *count = 0;
        arg
    };

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' | '`' => {
                let quote = c;
                let mut s = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    match ch {
                        '\\' if chars.peek() == Some(&quote) => {
                            chars.next();
                            s.push(quote);
                        }
                        ch if ch == quote => {
                            closed = true;
                            break;
                        }
                        ch => s.push(ch),
                    }
                }
                if !closed {
                    return Err(ParseError::MalformedAction("unterminated string".into()));
                }
                literal_count += 1;
                if literal_count > 1 || !raw.trim().is_empty() {
                    // Mixed content: keep the raw form so the type check reports it.
                    raw.push(quote);
                    raw.push_str(&s);
                    raw.push(quote);
                    if let Some(prev) = literal.take() {
                        raw.insert_str(0, &format!("{quote}{prev}{quote}"));
                    }
                } else {
                    literal = Some(s);
                }
            }
            ',' => {
                let arg = finish(&mut raw, &mut literal, &mut literal_count);
                if arg.text.is_empty() && !arg.quoted {
                    return Err(ParseError::MalformedAction("empty argument".into()));
                }
                args.push(arg);
            }
            c => {
                if literal.is_some() && !c.is_whitespace() {
                    // Text after a closed literal, e.g. "a"b.
                    if let Some(prev) = literal.take() {
                        raw.push_str(&format!("\"{prev}\""));
                    }
                    literal_count += 1;
                }
                raw.push(c);
            }
        }
    }

    let arg = finish(&mut raw, &mut literal, &mut literal_count);
    if arg.text.is_empty() && !arg.quoted {
        return Err(ParseError::MalformedAction("empty argument".into()));
    }
    args.push(arg);
    Ok(args)
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
}

fn typed(
    spec: &ToolSpec,
    param: &'static str,
    kind: ParamType,
    arg: &RawArg,
) -> Result<Value, ParseError> {
    let mismatch = |expected: &'static str| ParseError::ArgType {
        tool: spec.name,
        param,
        expected,
        found: clip(&arg.text).to_string(),
    };
    match kind {
        ParamType::String if arg.quoted => Ok(Value::Text(arg.text.clone())),
        ParamType::String => Err(mismatch("a quoted string")),
        ParamType::Number if arg.quoted => Err(mismatch("a number")),
        ParamType::Number => arg
            .text
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Value::Number)
            .ok_or_else(|| mismatch("a number")),
        ParamType::Boolean => match (arg.quoted, arg.text.as_str()) {
            (false, "true") => Ok(Value::Bool(true)),
            (false, "false") => Ok(Value::Bool(false)),
            _ => Err(mismatch("true or false")),
        },
    }
}

fn element_id(spec: &ToolSpec, value: &Value) -> Result<u32, ParseError> {
    match value {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= f64::from(u32::MAX) => {
            Ok(*n as u32)
        }
        Value::Number(n) => Err(ParseError::ArgType {
            tool: spec.name,
            param: "elementId",
            expected: "a non-negative integer",
            found: n.to_string(),
        }),
        other => Err(ParseError::ArgType {
            tool: spec.name,
            param: "elementId",
            expected: "a non-negative integer",
            found: format!("{other:?}"),
        }),
    }
}

fn text_arg(values: &[Value], index: usize) -> String {
    match values.get(index) {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    }
}

fn build(spec: &ToolSpec, values: Vec<Value>) -> Result<Action, ParseError> {
    let first = values.first();
    Ok(match spec.name {
        ToolName::Click => Action::Click {
            element_id: element_id(spec, first.unwrap_or(&Value::Number(-1.0)))?,
        },
        ToolName::SetValue => Action::SetValue {
            element_id: element_id(spec, first.unwrap_or(&Value::Number(-1.0)))?,
            value: text_arg(&values, 1),
        },
        ToolName::Navigate => Action::Navigate {
            url: text_arg(&values, 0),
        },
        ToolName::Waiting => Action::Waiting {
            seconds: match first {
                Some(Value::Number(n)) => *n,
                _ => 0.0,
            },
        },
        ToolName::Finish => Action::Finish,
        ToolName::Fail => Action::Fail {
            message: text_arg(&values, 0),
        },
        ToolName::Respond => Action::Respond {
            message: text_arg(&values, 0),
        },
    })
}

fn clip(s: &str) -> &str {
    match s.char_indices().nth(80) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(action: &str) -> String {
        format!("<thought>Looking at the page.</thought>\n<action>{action}</action>")
    }

    #[test]
    fn click_parses() {
        let parsed = parse_response(&reply("click(42)")).unwrap();
        assert_eq!(parsed.action, Action::Click { element_id: 42 });
        assert_eq!(parsed.thought, "Looking at the page.");
        assert_eq!(parsed.action_text, "click(42)");
    }

    #[test]
    fn set_value_parses() {
        let parsed = parse_response(&reply(r#"setValue(7,"hello")"#)).unwrap();
        assert_eq!(
            parsed.action,
            Action::SetValue {
                element_id: 7,
                value: "hello".into()
            }
        );
    }

    #[test]
    fn waiting_without_args_is_an_arity_error() {
        let err = parse_response(&reply("waiting()")).unwrap_err();
        assert_eq!(
            err,
            ParseError::Arity {
                tool: ToolName::Waiting,
                min: 1,
                max: 1,
                found: 0
            }
        );
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let err = parse_response(&reply("doStuff(1)")).unwrap_err();
        assert_eq!(err, ParseError::InvalidActionName("doStuff".into()));
    }

    #[test]
    fn tool_names_are_case_sensitive() {
        assert!(matches!(
            parse_response(&reply("Click(1)")),
            Err(ParseError::InvalidActionName(_))
        ));
    }

    #[test]
    fn missing_blocks() {
        assert_eq!(
            parse_response("<action>click(1)</action>"),
            Err(ParseError::MissingThought)
        );
        assert_eq!(
            parse_response("<thought>hmm</thought>"),
            Err(ParseError::MissingAction)
        );
        assert_eq!(
            parse_response("<thought>unclosed <action>click(1)"),
            Err(ParseError::MissingThought)
        );
    }

    #[test]
    fn tags_are_case_insensitive_and_first_wins() {
        let text = "<THOUGHT> first </Thought><Action>click(1)</ACTION><action>click(2)</action>";
        let parsed = parse_response(text).unwrap();
        assert_eq!(parsed.thought, "first");
        assert_eq!(parsed.action, Action::Click { element_id: 1 });
    }

    #[test]
    fn commas_and_escapes_inside_strings() {
        let parsed = parse_action(r#"setValue(3, "a, b")"#).unwrap();
        assert_eq!(
            parsed,
            Action::SetValue {
                element_id: 3,
                value: "a, b".into()
            }
        );

        let parsed = parse_action(r"respond('it\'s done')").unwrap();
        assert_eq!(parsed, Action::Respond { message: "it's done".into() });

        let parsed = parse_action(r#"setValue(1, `say "hi"`)"#).unwrap();
        assert_eq!(
            parsed,
            Action::SetValue {
                element_id: 1,
                value: r#"say "hi""#.into()
            }
        );
    }

    #[test]
    fn enter_marker_survives_parsing() {
        let parsed = parse_action(r#"setValue(12, "shoes\n")"#).unwrap();
        assert_eq!(
            parsed,
            Action::SetValue {
                element_id: 12,
                value: r"shoes\n".into()
            }
        );
    }

    #[test]
    fn argument_types_are_checked() {
        assert!(matches!(
            parse_action(r#"click("42")"#),
            Err(ParseError::ArgType { param: "elementId", .. })
        ));
        assert!(matches!(
            parse_action("setValue(7, hello)"),
            Err(ParseError::ArgType { param: "value", .. })
        ));
        assert!(matches!(
            parse_action(r#"setValue(7, "a"b)"#),
            Err(ParseError::ArgType { param: "value", .. })
        ));
        assert!(matches!(
            parse_action("click(-1)"),
            Err(ParseError::ArgType { expected: "a non-negative integer", .. })
        ));
        assert!(matches!(
            parse_action("click(4.5)"),
            Err(ParseError::ArgType { .. })
        ));
        assert!(matches!(
            parse_action("waiting(abc)"),
            Err(ParseError::ArgType { expected: "a number", .. })
        ));
    }

    #[test]
    fn waiting_accepts_fractions() {
        assert_eq!(
            parse_action("waiting(1.5)").unwrap(),
            Action::Waiting { seconds: 1.5 }
        );
    }

    #[test]
    fn too_many_arguments() {
        assert!(matches!(
            parse_action("finish(1)"),
            Err(ParseError::Arity { found: 1, max: 0, .. })
        ));
        assert!(matches!(
            parse_action("click(1, 2)"),
            Err(ParseError::Arity { found: 2, .. })
        ));
    }

    #[test]
    fn malformed_calls() {
        for text in ["click", "click(1", "click 1)", "(1)", "cl ick(1)", "click(1,)", r#"fail("oops)"#] {
            assert!(
                matches!(parse_action(text), Err(ParseError::MalformedAction(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn oversized_input_is_rejected() {
        let big = "x".repeat(MAX_RESPONSE_LEN + 1);
        assert!(matches!(parse_response(&big), Err(ParseError::TooLong { .. })));
    }

    #[test]
    fn adversarial_inputs_never_panic() {
        let long_parens = "(".repeat(10_000);
        let inputs = [
            "",
            "<",
            "<thought>",
            "</thought><thought>",
            "<thought>é</thought><action>ü(</action>",
            "<thought>x</thought><action>)(</action>",
            "<thought>x</thought><action>click(((1)))</action>",
            "<thought>x</thought><action>setValue(1, \"\\\")</action>",
            "<thought>x</thought><action>navigate('😀')</action>",
            "<thought>x</thought><action>click(99999999999999999999)</action>",
            "<thought>x</thought><action>click(NaN)</action>",
            "<thought>x</thought><action>click(inf)</action>",
            long_parens.as_str(),
        ];
        for input in inputs {
            let _ = parse_response(input);
        }
        assert_eq!(
            parse_response("<thought>x</thought><action>navigate('😀')</action>")
                .unwrap()
                .action,
            Action::Navigate { url: "😀".into() }
        );
    }
}
