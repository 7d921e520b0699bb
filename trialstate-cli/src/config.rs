//! Session file loading and parsing

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use trialstate::{EngineConfig, Value};

use crate::events::EventSpec;

/// A complete session description (loaded from session.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Initial experiment variables
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// Scripted input timeline
    #[serde(default)]
    pub events: Vec<EventSpec>,
    /// Top-level states, run one after another
    #[serde(default)]
    pub tree: Vec<NodeSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    /// Sleep one frame period per frame
    #[serde(default)]
    pub realtime: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            frame_rate: default_frame_rate(),
            realtime: false,
        }
    }
}

fn default_name() -> String {
    "session".to_string()
}

fn default_frame_rate() -> f64 {
    60.0
}

/// A parameter in a session file
///
/// Plain TOML values are literals. A string starting with `=` is an
/// expression, e.g. `"=@response.rt * 1000"`.
pub type Param = Value;

/// Timing options shared by every node
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Timing {
    pub name: Option<String>,
    pub duration: Option<Param>,
    pub until: Option<Param>,
    /// Whether the state's exit record is written
    pub save_log: Option<bool>,
}

/// One state in the session tree, tagged by `type`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeSpec {
    Wait {
        #[serde(flatten)]
        timing: Timing,
    },
    KeyPress {
        keys: Option<Param>,
        correct: Option<Param>,
        base_time: Option<Param>,
        #[serde(flatten)]
        timing: Timing,
    },
    PointerPress {
        buttons: Option<Param>,
        correct: Option<Param>,
        base_time: Option<Param>,
        #[serde(flatten)]
        timing: Timing,
    },
    KeyRecord {
        #[serde(flatten)]
        timing: Timing,
    },
    Record {
        #[serde(default)]
        track: BTreeMap<String, Param>,
        #[serde(flatten)]
        timing: Timing,
    },
    Stimulus {
        stimulus: String,
        #[serde(default)]
        params: BTreeMap<String, Param>,
        #[serde(flatten)]
        timing: Timing,
    },
    Func {
        function: String,
        #[serde(default)]
        args: Vec<Param>,
        #[serde(flatten)]
        timing: Timing,
    },
    Set {
        var: String,
        value: Param,
        #[serde(flatten)]
        timing: Timing,
    },
    Log {
        #[serde(default)]
        values: BTreeMap<String, Param>,
        #[serde(flatten)]
        timing: Timing,
    },
    Done {
        target: String,
        #[serde(flatten)]
        timing: Timing,
    },
    ResetClock {
        #[serde(default)]
        new_time: Option<Param>,
        #[serde(flatten)]
        timing: Timing,
    },
    Serial {
        #[serde(default)]
        children: Vec<NodeSpec>,
        #[serde(flatten)]
        timing: Timing,
    },
    Subroutine {
        #[serde(default)]
        children: Vec<NodeSpec>,
        #[serde(flatten)]
        timing: Timing,
    },
    Parallel {
        #[serde(default)]
        children: Vec<NodeSpec>,
        #[serde(flatten)]
        timing: Timing,
    },
    Meanwhile {
        #[serde(default)]
        primary: Vec<NodeSpec>,
        #[serde(default)]
        background: Vec<NodeSpec>,
        #[serde(flatten)]
        timing: Timing,
    },
    UntilDone {
        #[serde(default)]
        background: Vec<NodeSpec>,
        #[serde(default)]
        distinguished: Vec<NodeSpec>,
        #[serde(flatten)]
        timing: Timing,
    },
    Loop {
        times: Option<i64>,
        #[serde(rename = "while")]
        condition: Option<String>,
        over: Option<Vec<Value>>,
        #[serde(default)]
        children: Vec<NodeSpec>,
        #[serde(flatten)]
        timing: Timing,
    },
    If {
        condition: String,
        #[serde(default)]
        children: Vec<NodeSpec>,
        #[serde(default)]
        elif: Vec<BranchSpec>,
        #[serde(rename = "else")]
        otherwise: Option<Vec<NodeSpec>>,
        #[serde(flatten)]
        timing: Timing,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchSpec {
    pub condition: String,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn timing(&self) -> &Timing {
        match self {
            NodeSpec::Wait { timing }
            | NodeSpec::KeyPress { timing, .. }
            | NodeSpec::PointerPress { timing, .. }
            | NodeSpec::KeyRecord { timing }
            | NodeSpec::Record { timing, .. }
            | NodeSpec::Stimulus { timing, .. }
            | NodeSpec::Func { timing, .. }
            | NodeSpec::Set { timing, .. }
            | NodeSpec::Log { timing, .. }
            | NodeSpec::Done { timing, .. }
            | NodeSpec::ResetClock { timing, .. }
            | NodeSpec::Serial { timing, .. }
            | NodeSpec::Subroutine { timing, .. }
            | NodeSpec::Parallel { timing, .. }
            | NodeSpec::Meanwhile { timing, .. }
            | NodeSpec::UntilDone { timing, .. }
            | NodeSpec::Loop { timing, .. }
            | NodeSpec::If { timing, .. } => timing,
        }
    }
}

/// Load a session from a TOML file
pub fn load_config(path: &Path) -> Result<SessionConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file: {:?}", path))?;

    parse_config(&content).with_context(|| format!("Failed to parse session file: {:?}", path))
}

pub fn parse_config(content: &str) -> Result<SessionConfig> {
    let config: SessionConfig = toml::from_str(content)?;
    let rate = config.session.frame_rate;
    if rate.is_nan() || rate <= 0.0 {
        anyhow::bail!("frame_rate must be positive, got {}", rate);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [session]
            name = "choice"
            frame_rate = 120.0

            [engine]
            uppercase_keys = false

            [variables]
            score = 0

            [[events]]
            kind = "KEY_DOWN"
            key = "J"
            time = 1.25

            [[tree]]
            type = "wait"
            duration = 1.0

            [[tree]]
            type = "key_press"
            name = "response"
            keys = ["J", "K"]
            correct = "K"
            duration = 2.0
        "#;

        let config = parse_config(toml_content).unwrap();
        assert_eq!(config.session.name, "choice");
        assert_eq!(config.session.frame_rate, 120.0);
        assert!(!config.engine.uppercase_keys);
        assert_eq!(config.engine.max_iterations_per_tick, 1000);
        assert_eq!(config.variables.get("score"), Some(&Value::Int(0)));
        assert_eq!(config.events.len(), 1);
        assert_eq!(config.tree.len(), 2);

        match &config.tree[1] {
            NodeSpec::KeyPress { keys, correct, timing, .. } => {
                assert_eq!(keys, &Some(Value::from(vec!["J", "K"])));
                assert_eq!(correct, &Some(Value::from("K")));
                assert_eq!(timing.name.as_deref(), Some("response"));
                assert_eq!(timing.duration, Some(Value::Float(2.0)));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_nested_nodes() {
        let toml_content = r#"
            [[tree]]
            type = "loop"
            name = "trials"
            times = 3

            [[tree.children]]
            type = "if"
            condition = "@trials.i == 0"

            [[tree.children.children]]
            type = "wait"
            duration = 0.5

            [[tree.children.elif]]
            condition = "@trials.i == 1"
            children = [{ type = "wait", duration = 0.25 }]

            [[tree.children.else]]
            type = "log"
            values = { note = "last" }
        "#;

        let config = parse_config(toml_content).unwrap();
        let NodeSpec::Loop { times, children, timing, .. } = &config.tree[0] else {
            panic!("expected a loop");
        };
        assert_eq!(*times, Some(3));
        assert_eq!(timing.name.as_deref(), Some("trials"));
        let NodeSpec::If { elif, otherwise, .. } = &children[0] else {
            panic!("expected an if");
        };
        assert_eq!(elif.len(), 1);
        assert_eq!(otherwise.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_defaults_and_bad_frame_rate() {
        let config = parse_config("").unwrap();
        assert_eq!(config.session.name, "session");
        assert_eq!(config.session.frame_rate, 60.0);
        assert!(config.tree.is_empty());

        assert!(parse_config("[session]\nframe_rate = 0.0").is_err());
    }

    #[test]
    fn test_unknown_node_type_is_rejected() {
        let toml_content = r#"
            [[tree]]
            type = "teleport"
        "#;
        assert!(parse_config(toml_content).is_err());
    }
}
