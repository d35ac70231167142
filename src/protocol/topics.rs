//! Topic grammars of the iot-2 platform
//!
//! Every inbound grammar has one parser that returns the captured fields by
//! name, or [`MessageError::InvalidEvent`] carrying the offending topic.
//! Captures are `(.+)`: any non-empty text is accepted, slashes included.
//! Outbound and subscription topics are produced by [`TopicBuilder`].

use super::messages::MessageError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

fn grammar(pattern: &str) -> Regex {
    Regex::new(pattern).expect("topic grammar must be a valid regex")
}

static EVENT_TOPIC: Lazy<Regex> =
    Lazy::new(|| grammar(r"^iot-2/type/(.+)/id/(.+)/evt/(.+)/fmt/(.+)$"));
static COMMAND_TOPIC: Lazy<Regex> =
    Lazy::new(|| grammar(r"^iot-2/type/(.+)/id/(.+)/cmd/(.+)/fmt/(.+)$"));
static DEVICE_COMMAND_TOPIC: Lazy<Regex> = Lazy::new(|| grammar(r"^iot-2/cmd/(.+)/fmt/(.+)$"));
static STATUS_TOPIC: Lazy<Regex> = Lazy::new(|| grammar(r"^iot-2/type/(.+)/id/(.+)/mon$"));
static DEVICE_STATE_TOPIC: Lazy<Regex> =
    Lazy::new(|| grammar(r"^iot-2/type/(.+)/id/(.+)/intf/(.+)/evt/state$"));
static THING_STATE_TOPIC: Lazy<Regex> =
    Lazy::new(|| grammar(r"^iot-2/thing/type/(.+)/id/(.+)/intf/(.+)/evt/state$"));
static DEVICE_ERROR_TOPIC: Lazy<Regex> =
    Lazy::new(|| grammar(r"^iot-2/type/(.+)/id/(.+)/err/data$"));
static THING_ERROR_TOPIC: Lazy<Regex> =
    Lazy::new(|| grammar(r"^iot-2/thing/type/(.+)/id/(.+)/err/data$"));
static NOTIFICATION_TOPIC: Lazy<Regex> =
    Lazy::new(|| grammar(r"^iot-2/type/(.+)/id/(.+)/notify$"));
static APP_STATUS_TOPIC: Lazy<Regex> = Lazy::new(|| grammar(r"^iot-2/app/(.+)/mon$"));

/// Fields of `iot-2/type/{typeId}/id/{deviceId}/evt/{eventId}/fmt/{format}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTopic {
    pub type_id: String,
    pub device_id: String,
    pub event_id: String,
    pub format: String,
}

/// Fields of `iot-2/type/{typeId}/id/{deviceId}/cmd/{commandId}/fmt/{format}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic {
    pub type_id: String,
    pub device_id: String,
    pub command_id: String,
    pub format: String,
}

/// Fields of the device-side `iot-2/cmd/{commandId}/fmt/{format}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommandTopic {
    pub command_id: String,
    pub format: String,
}

/// Fields of `iot-2/type/{typeId}/id/{deviceId}/mon`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTopic {
    pub type_id: String,
    pub device_id: String,
}

/// Fields of a device or thing state topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTopic {
    pub type_id: String,
    pub id: String,
    pub logical_interface_id: String,
}

/// Fields of a device or thing error topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorTopic {
    pub type_id: String,
    pub id: String,
}

/// Fields of `iot-2/type/{typeId}/id/{deviceId}/notify`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTopic {
    pub type_id: String,
    pub device_id: String,
}

/// Fields of `iot-2/app/{appId}/mon`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStatusTopic {
    pub app_id: String,
}

fn capture<'t>(regex: &Regex, topic: &'t str, kind: &str) -> Result<Captures<'t>, MessageError> {
    regex
        .captures(topic)
        .ok_or_else(|| MessageError::invalid_event(format!("Received {kind} on invalid topic: {topic}")))
}

fn group(captures: &Captures<'_>, index: usize) -> String {
    captures
        .get(index)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

pub fn parse_event_topic(topic: &str) -> Result<EventTopic, MessageError> {
    let c = capture(&EVENT_TOPIC, topic, "device event")?;
    Ok(EventTopic {
        type_id: group(&c, 1),
        device_id: group(&c, 2),
        event_id: group(&c, 3),
        format: group(&c, 4),
    })
}

/// Parse an application or gateway scoped command topic
pub fn parse_command_topic(topic: &str) -> Result<CommandTopic, MessageError> {
    let c = capture(&COMMAND_TOPIC, topic, "command")?;
    Ok(CommandTopic {
        type_id: group(&c, 1),
        device_id: group(&c, 2),
        command_id: group(&c, 3),
        format: group(&c, 4),
    })
}

pub fn parse_device_command_topic(topic: &str) -> Result<DeviceCommandTopic, MessageError> {
    let c = capture(&DEVICE_COMMAND_TOPIC, topic, "command")?;
    Ok(DeviceCommandTopic {
        command_id: group(&c, 1),
        format: group(&c, 2),
    })
}

pub fn parse_status_topic(topic: &str) -> Result<StatusTopic, MessageError> {
    let c = capture(&STATUS_TOPIC, topic, "device status")?;
    Ok(StatusTopic {
        type_id: group(&c, 1),
        device_id: group(&c, 2),
    })
}

pub fn parse_device_state_topic(topic: &str) -> Result<StateTopic, MessageError> {
    let c = capture(&DEVICE_STATE_TOPIC, topic, "device state")?;
    Ok(StateTopic {
        type_id: group(&c, 1),
        id: group(&c, 2),
        logical_interface_id: group(&c, 3),
    })
}

pub fn parse_thing_state_topic(topic: &str) -> Result<StateTopic, MessageError> {
    let c = capture(&THING_STATE_TOPIC, topic, "thing state")?;
    Ok(StateTopic {
        type_id: group(&c, 1),
        id: group(&c, 2),
        logical_interface_id: group(&c, 3),
    })
}

pub fn parse_device_error_topic(topic: &str) -> Result<ErrorTopic, MessageError> {
    let c = capture(&DEVICE_ERROR_TOPIC, topic, "error message")?;
    Ok(ErrorTopic {
        type_id: group(&c, 1),
        id: group(&c, 2),
    })
}

pub fn parse_thing_error_topic(topic: &str) -> Result<ErrorTopic, MessageError> {
    let c = capture(&THING_ERROR_TOPIC, topic, "error message")?;
    Ok(ErrorTopic {
        type_id: group(&c, 1),
        id: group(&c, 2),
    })
}

pub fn parse_notification_topic(topic: &str) -> Result<NotificationTopic, MessageError> {
    let c = capture(&NOTIFICATION_TOPIC, topic, "notification")?;
    Ok(NotificationTopic {
        type_id: group(&c, 1),
        device_id: group(&c, 2),
    })
}

pub fn parse_app_status_topic(topic: &str) -> Result<AppStatusTopic, MessageError> {
    let c = capture(&APP_STATUS_TOPIC, topic, "application status")?;
    Ok(AppStatusTopic {
        app_id: group(&c, 1),
    })
}

/// Match `topic` against an MQTT subscription filter (pure function)
///
/// `+` matches exactly one level and a trailing `#` matches the remaining
/// levels, including none.
pub fn topic_matches_filter(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Construction of publish topics and subscription filters
pub struct TopicBuilder;

impl TopicBuilder {
    /// Device-side event topic: `iot-2/evt/{event}/fmt/{format}`
    pub fn device_event(event_id: &str, format: &str) -> String {
        format!("iot-2/evt/{event_id}/fmt/{format}")
    }

    /// Device-side command filter covering every command and format
    pub fn device_commands() -> String {
        "iot-2/cmd/+/fmt/+".to_string()
    }

    pub fn event(type_id: &str, device_id: &str, event_id: &str, format: &str) -> String {
        format!("iot-2/type/{type_id}/id/{device_id}/evt/{event_id}/fmt/{format}")
    }

    pub fn command(type_id: &str, device_id: &str, command_id: &str, format: &str) -> String {
        format!("iot-2/type/{type_id}/id/{device_id}/cmd/{command_id}/fmt/{format}")
    }

    pub fn status(type_id: &str, device_id: &str) -> String {
        format!("iot-2/type/{type_id}/id/{device_id}/mon")
    }

    pub fn device_state(type_id: &str, device_id: &str, logical_interface_id: &str) -> String {
        format!("iot-2/type/{type_id}/id/{device_id}/intf/{logical_interface_id}/evt/state")
    }

    pub fn thing_state(type_id: &str, thing_id: &str, logical_interface_id: &str) -> String {
        format!("iot-2/thing/type/{type_id}/id/{thing_id}/intf/{logical_interface_id}/evt/state")
    }

    pub fn device_error(type_id: &str, device_id: &str) -> String {
        format!("iot-2/type/{type_id}/id/{device_id}/err/data")
    }

    pub fn thing_error(type_id: &str, thing_id: &str) -> String {
        format!("iot-2/thing/type/{type_id}/id/{thing_id}/err/data")
    }

    pub fn notification(type_id: &str, device_id: &str) -> String {
        format!("iot-2/type/{type_id}/id/{device_id}/notify")
    }

    pub fn app_status(app_id: &str) -> String {
        format!("iot-2/app/{app_id}/mon")
    }
}
