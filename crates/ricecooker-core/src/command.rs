//! Command vocabulary
//!
//! Commands are relayed to the firmware through the device record. Depending
//! on the firmware build, the record carries them as a bag of boolean flags,
//! a single command string, or a queue of pending action names. All three
//! decode into the same [`Command`] and can be produced by [`Command::patch`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::models::CurrentAction;
use crate::remote::ServerValue;

/// An instruction for the device firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    AddWater,
    DispenseRice,
    Cook,
    Cancel,
}

/// Flag names in the order they are checked when decoding
const START_FLAGS: [(&str, Command); 3] = [
    ("add_water", Command::AddWater),
    ("dispense", Command::DispenseRice),
    ("cook", Command::Cook),
];

impl Command {
    pub const ALL: [Command; 4] = [
        Command::AddWater,
        Command::DispenseRice,
        Command::Cook,
        Command::Cancel,
    ];

    /// Name used on the wire (flag key, command string, queue entry)
    pub fn wire_name(self) -> &'static str {
        match self {
            Command::AddWater => "add_water",
            Command::DispenseRice => "dispense",
            Command::Cook => "cook",
            Command::Cancel => "cancel",
        }
    }

    /// Parse a wire name, accepting the spellings older clients used
    pub fn from_wire_name(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(' ', "_").as_str() {
            "add_water" | "water" => Some(Command::AddWater),
            "dispense" | "dispense_rice" => Some(Command::DispenseRice),
            "cook" => Some(Command::Cook),
            "cancel" => Some(Command::Cancel),
            _ => None,
        }
    }

    pub fn is_cancel(self) -> bool {
        self == Command::Cancel
    }

    /// The action the firmware reports once this command has started
    pub fn expected_action(self) -> Option<CurrentAction> {
        match self {
            Command::AddWater => Some(CurrentAction::AddWater),
            Command::DispenseRice => Some(CurrentAction::DispenseRice),
            Command::Cook => Some(CurrentAction::Cook),
            Command::Cancel => None,
        }
    }

    /// Whether a reported action shows this command took effect
    ///
    /// Cancel is confirmed by any action that is no longer in progress.
    pub fn is_confirmed_by(self, action: CurrentAction) -> bool {
        match self.expected_action() {
            Some(expected) => action == expected,
            None => !action.is_in_progress(),
        }
    }

    /// Read the outstanding command from a raw device record
    ///
    /// When several flags are set, cancel wins, then add water, dispense
    /// and cook in that order.
    pub fn decode(record: &Value) -> Option<Self> {
        let from_command = match record.get("command") {
            Some(Value::Object(flags)) => {
                let is_set = |name: &str| flags.get(name).and_then(Value::as_bool) == Some(true);
                if is_set("cancel") {
                    Some(Command::Cancel)
                } else {
                    START_FLAGS
                        .iter()
                        .find(|(name, _)| is_set(name))
                        .map(|(_, cmd)| *cmd)
                }
            }
            Some(Value::String(name)) => Command::from_wire_name(name),
            _ => None,
        };

        from_command.or_else(|| {
            record
                .get("queue")
                .and_then(Value::as_array)
                .and_then(|queue| queue.first())
                .and_then(Value::as_str)
                .and_then(Command::from_wire_name)
        })
    }

    /// Multi-path update that issues this command
    ///
    /// Every other command is cleared. Cancel also clears the queue and the
    /// running stage. The update always stamps `lastUpdated` with the server
    /// clock so the echo can be ordered against other notifications.
    pub fn patch(self, wire: CommandWire) -> Map<String, Value> {
        let mut patch = Map::new();

        match wire {
            CommandWire::Flags => {
                for cmd in Command::ALL {
                    patch.insert(format!("command/{}", cmd.wire_name()), json!(cmd == self));
                }
                if self.is_cancel() {
                    patch.insert("queue".to_string(), Value::Null);
                }
            }
            CommandWire::Single => {
                patch.insert("command".to_string(), json!(self.wire_name()));
                if self.is_cancel() {
                    patch.insert("queue".to_string(), Value::Null);
                }
            }
            CommandWire::Queue => {
                patch.insert("command".to_string(), Value::Null);
                patch.insert("queue".to_string(), json!([self.wire_name()]));
            }
        }

        if self.is_cancel() {
            patch.insert("currentStage".to_string(), Value::Null);
        }
        patch.insert("lastUpdated".to_string(), ServerValue::timestamp());
        patch
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::AddWater => "add water",
            Command::DispenseRice => "dispense rice",
            Command::Cook => "cook",
            Command::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// How commands are laid out in the device record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandWire {
    /// `command: { add_water, dispense, cook, cancel }` booleans
    #[default]
    Flags,
    /// `command: "cook"`
    Single,
    /// `queue: ["cook"]`
    Queue,
}

impl FromStr for CommandWire {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flags" => Ok(CommandWire::Flags),
            "single" => Ok(CommandWire::Single),
            "queue" => Ok(CommandWire::Queue),
            other => Err(format!(
                "unknown command wire '{}', expected flags, single or queue",
                other
            )),
        }
    }
}

impl fmt::Display for CommandWire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandWire::Flags => "flags",
            CommandWire::Single => "single",
            CommandWire::Queue => "queue",
        };
        f.write_str(name)
    }
}
