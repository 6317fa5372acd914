//! Wire messages exchanged with the management process.
//!
//! Both directions are one JSON object per line. Sensor-to-manager frames
//! distinguish authorization requests (a verdict is expected back) from
//! plain notifications; manager-to-sensor frames carry verdict replies and
//! configuration pushes.

use serde::{Deserialize, Serialize};

use sensor_core::{FileIdentity, SensorEvent};

/// Sensor-to-manager frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorMessage {
    /// The event's subject action is held pending a verdict keyed by
    /// `event.event_id`.
    Auth { event: SensorEvent },
    /// Informational event, no reply expected.
    Notify { event: SensorEvent },
}

impl SensorMessage {
    pub fn event(&self) -> &SensorEvent {
        match self {
            Self::Auth { event } | Self::Notify { event } => event,
        }
    }
}

/// Manager-to-sensor frame.
///
/// `mute_type` is the numeric list code so older managers keep working
/// when list kinds are added; unknown codes are logged and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlMessage {
    ReplyAuth {
        event_id: u64,
        allow: bool,
    },
    UpdateMuteList {
        mute_type: u8,
        identities: Vec<FileIdentity>,
    },
    SetLogLevel {
        level: String,
    },
}

#[cfg(test)]
mod tests {
    use sensor_core::EventType;

    use super::*;

    #[test]
    fn auth_frames_tag_their_kind() {
        let mut event = SensorEvent::new(EventType::ProcessCreate);
        event.event_id = 7;
        let encoded = serde_json::to_string(&SensorMessage::Auth { event }).expect("encode");
        assert!(encoded.contains(r#""kind":"auth""#));
        assert!(encoded.contains(r#""event_id":7"#));
    }

    #[test]
    fn control_frames_decode_from_manager_json() {
        let decoded: ControlMessage =
            serde_json::from_str(r#"{"kind":"reply_auth","event_id":42,"allow":false}"#)
                .expect("decode");
        assert!(matches!(
            decoded,
            ControlMessage::ReplyAuth {
                event_id: 42,
                allow: false
            }
        ));

        let decoded: ControlMessage = serde_json::from_str(
            r#"{"kind":"update_mute_list","mute_type":1,"identities":[4294967297,12]}"#,
        )
        .expect("decode");
        match decoded {
            ControlMessage::UpdateMuteList {
                mute_type,
                identities,
            } => {
                assert_eq!(mute_type, 1);
                assert_eq!(identities, vec![FileIdentity(4294967297), FileIdentity(12)]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_a_decode_error() {
        assert!(serde_json::from_str::<ControlMessage>(r#"{"kind":"reboot"}"#).is_err());
    }
}
