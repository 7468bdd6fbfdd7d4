//! The closed tool vocabulary the agent may request.
//!
//! Every model turn resolves to exactly one [`Action`]. The table in
//! [`TOOLS`] declares each tool's parameters; the response parser checks
//! arguments against it before an `Action` is ever built.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Number,
    String,
    Boolean,
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub required: bool,
}

/// Static description of a tool in the vocabulary.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: ToolName,
    pub params: &'static [ParamSpec],
    pub description: &'static str,
}

impl ToolSpec {
    /// Number of parameters that must be supplied.
    pub fn required(&self) -> usize {
        self.params.iter().filter(|p| p.required).count()
    }

    /// Signature line used in the system prompt, e.g. `setValue(elementId: number, value: string)`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let kind = match p.kind {
                    ParamType::Number => "number",
                    ParamType::String => "string",
                    ParamType::Boolean => "boolean",
                };
                if p.required {
                    format!("{}: {kind}", p.name)
                } else {
                    format!("{}?: {kind}", p.name)
                }
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

/// Names of every tool the agent may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolName {
    #[serde(rename = "click")]
    Click,
    #[serde(rename = "setValue")]
    SetValue,
    #[serde(rename = "navigate")]
    Navigate,
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "finish")]
    Finish,
    #[serde(rename = "fail")]
    Fail,
    #[serde(rename = "respond")]
    Respond,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::SetValue => "setValue",
            Self::Navigate => "navigate",
            Self::Waiting => "waiting",
            Self::Finish => "finish",
            Self::Fail => "fail",
            Self::Respond => "respond",
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        TOOLS.iter().map(|t| t.name).find(|t| t.as_str() == name)
    }

    pub fn spec(&self) -> &'static ToolSpec {
        // Every variant has exactly one row in TOOLS.
        TOOLS
            .iter()
            .find(|t| t.name == *self)
            .unwrap_or(&TOOLS[0])
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ELEMENT_ID: ParamSpec = ParamSpec {
    name: "elementId",
    kind: ParamType::Number,
    required: true,
};

/// The full tool vocabulary.
pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: ToolName::Click,
        params: &[ELEMENT_ID],
        description: "Click the element with the given id.",
    },
    ToolSpec {
        name: ToolName::SetValue,
        params: &[
            ELEMENT_ID,
            ParamSpec {
                name: "value",
                kind: ParamType::String,
                required: true,
            },
        ],
        description: "Focus the element and type the value, replacing its content.",
    },
    ToolSpec {
        name: ToolName::Navigate,
        params: &[ParamSpec {
            name: "url",
            kind: ParamType::String,
            required: true,
        }],
        description: "Load the given URL in the current tab.",
    },
    ToolSpec {
        name: ToolName::Waiting,
        params: &[ParamSpec {
            name: "seconds",
            kind: ParamType::Number,
            required: true,
        }],
        description: "Wait for the page to change.",
    },
    ToolSpec {
        name: ToolName::Finish,
        params: &[],
        description: "The task is complete.",
    },
    ToolSpec {
        name: ToolName::Fail,
        params: &[ParamSpec {
            name: "message",
            kind: ParamType::String,
            required: true,
        }],
        description: "The task cannot be completed; explain why.",
    },
    ToolSpec {
        name: ToolName::Respond,
        params: &[ParamSpec {
            name: "message",
            kind: ParamType::String,
            required: true,
        }],
        description: "Reply to the user and stop, e.g. to answer a question or ask for help.",
    },
];

/// A validated, typed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "camelCase")]
pub enum Action {
    Click {
        #[serde(rename = "elementId")]
        element_id: u32,
    },
    SetValue {
        #[serde(rename = "elementId")]
        element_id: u32,
        value: String,
    },
    Navigate {
        url: String,
    },
    Waiting {
        seconds: f64,
    },
    Finish,
    Fail {
        message: String,
    },
    Respond {
        message: String,
    },
}

impl Action {
    pub fn tool(&self) -> ToolName {
        match self {
            Self::Click { .. } => ToolName::Click,
            Self::SetValue { .. } => ToolName::SetValue,
            Self::Navigate { .. } => ToolName::Navigate,
            Self::Waiting { .. } => ToolName::Waiting,
            Self::Finish => ToolName::Finish,
            Self::Fail { .. } => ToolName::Fail,
            Self::Respond { .. } => ToolName::Respond,
        }
    }

    /// Terminal actions end the task instead of touching the page.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish | Self::Fail { .. } | Self::Respond { .. })
    }

    /// The element id this action targets, if it targets one.
    pub fn element_id(&self) -> Option<u32> {
        match self {
            Self::Click { element_id } | Self::SetValue { element_id, .. } => Some(*element_id),
            _ => None,
        }
    }
}

/// A scalar argument value as persisted in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// Persisted form of an action: `{name, args}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub name: ToolName,
    #[serde(default)]
    pub args: BTreeMap<String, ArgValue>,
}

impl From<&Action> for ActionRecord {
    fn from(action: &Action) -> Self {
        let mut args = BTreeMap::new();
        match action {
            Action::Click { element_id } => {
                args.insert("elementId".into(), ArgValue::Number(f64::from(*element_id)));
            }
            Action::SetValue { element_id, value } => {
                args.insert("elementId".into(), ArgValue::Number(f64::from(*element_id)));
                args.insert("value".into(), ArgValue::Text(value.clone()));
            }
            Action::Navigate { url } => {
                args.insert("url".into(), ArgValue::Text(url.clone()));
            }
            Action::Waiting { seconds } => {
                args.insert("seconds".into(), ArgValue::Number(*seconds));
            }
            Action::Finish => {}
            Action::Fail { message } | Action::Respond { message } => {
                args.insert("message".into(), ArgValue::Text(message.clone()));
            }
        }
        Self {
            name: action.tool(),
            args,
        }
    }
}

impl fmt::Display for ActionRecord {
    /// Renders in the same `name(args)` shape the model writes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spec = self.name.spec();
        let rendered: Vec<String> = spec
            .params
            .iter()
            .filter_map(|p| self.args.get(p.name))
            .map(|v| match v {
                ArgValue::Bool(b) => b.to_string(),
                ArgValue::Number(n) => format_number(*n),
                ArgValue::Text(s) => format!("{s:?}"),
            })
            .collect();
        write!(f, "{}({})", self.name, rendered.join(", "))
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Outcome of dispatching an action to the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}
