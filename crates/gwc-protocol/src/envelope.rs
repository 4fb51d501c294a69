use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::types::{now_secs, GroupId, Kind, PeerStatus, PROTOCOL_VERSION};

/// Protocol-level envelope, the unit exchanged between daemons.
///
/// On the wire it is a UTF-8 JSON object inside a length-prefixed frame:
/// `{ver, tipo, token, origen, destino, payload, meta: {ts}}`. The `tipo`
/// string and `payload` object are modelled together by [`Body`], so an
/// envelope can never carry a payload that does not fit its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Protocol version (`ver`).
    pub version: u32,
    /// Opaque correlation token, echoed by nobody today.
    pub token: Option<String>,
    /// Sender identity block (`origen`).
    pub origin: Origin,
    /// Group id, peer uid or `"ALL"` (`destino`).
    pub destination: String,
    /// Kind plus kind-specific payload.
    pub body: Body,
    /// Creation timestamp (Unix seconds).
    pub ts: u64,
}

/// Identity block every envelope carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub uid: String,
    pub nick: String,
    pub ip: String,
    #[serde(default)]
    pub status_msg: Option<String>,
    #[serde(default)]
    pub port_priv: u16,
    #[serde(default)]
    pub port_group: u16,
}

/// Member snapshot exchanged in `SYNC` and stored per group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub uid: String,
    pub nick: String,
    pub ip: String,
    #[serde(default)]
    pub port_priv: u16,
    #[serde(default)]
    pub port_group: u16,
    #[serde(default = "online")]
    pub status: PeerStatus,
}

fn online() -> PeerStatus {
    PeerStatus::Online
}

impl From<&Origin> for Member {
    fn from(origin: &Origin) -> Self {
        Self {
            uid: origin.uid.clone(),
            nick: origin.nick.clone(),
            ip: origin.ip.clone(),
            port_priv: origin.port_priv,
            port_group: origin.port_group,
            status: PeerStatus::Online,
        }
    }
}

/// What a `DISCOVER` asks recipients to report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiscoverFilter {
    Peers,
    Groups,
    #[default]
    All,
    /// Liveness heartbeat, never answered.
    Ping,
}

/// `FOUND` payload: either a room or a live peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Found {
    Group { name: String, gid: GroupId },
    Peer { status: String },
}

/// Envelope kind together with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tipo", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Body {
    Search {
        group_name: String,
    },
    Found(Found),
    Discover {
        #[serde(default)]
        filter: DiscoverFilter,
    },
    WhoName {
        nick: String,
    },
    Iam {},
    JoinReq {
        gid: GroupId,
        #[serde(default)]
        password_hash: Option<String>,
    },
    Welcome {
        gid: GroupId,
        name: String,
    },
    SyncReq {
        gid: GroupId,
    },
    Sync {
        gid: GroupId,
        #[serde(default)]
        members: Vec<Member>,
    },
    Announce {
        gid: GroupId,
        user: Origin,
    },
    Msg {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gid: Option<GroupId>,
    },
    Leave {
        gid: GroupId,
    },
    Invite {
        gid: GroupId,
        name: String,
        #[serde(default)]
        password_hash: Option<String>,
    },
    ChatReq {},
    ChatAck {},
    ChatNo {
        #[serde(default)]
        reason: String,
    },
    ChatBye {},
}

impl Body {
    pub fn kind(&self) -> Kind {
        match self {
            Body::Search { .. } => Kind::Search,
            Body::Found(_) => Kind::Found,
            Body::Discover { .. } => Kind::Discover,
            Body::WhoName { .. } => Kind::WhoName,
            Body::Iam {} => Kind::Iam,
            Body::JoinReq { .. } => Kind::JoinReq,
            Body::Welcome { .. } => Kind::Welcome,
            Body::SyncReq { .. } => Kind::SyncReq,
            Body::Sync { .. } => Kind::Sync,
            Body::Announce { .. } => Kind::Announce,
            Body::Msg { .. } => Kind::Msg,
            Body::Leave { .. } => Kind::Leave,
            Body::Invite { .. } => Kind::Invite,
            Body::ChatReq {} => Kind::ChatReq,
            Body::ChatAck {} => Kind::ChatAck,
            Body::ChatNo { .. } => Kind::ChatNo,
            Body::ChatBye {} => Kind::ChatBye,
        }
    }
}

impl Envelope {
    /// Create a current-version envelope stamped with the local clock.
    pub fn new(origin: Origin, destination: impl Into<String>, body: Body) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            token: None,
            origin,
            destination: destination.into(),
            body,
            ts: now_secs(),
        }
    }

    /// Attach a correlation token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn kind(&self) -> Kind {
        self.body.kind()
    }

    /// The JSON object, without framing.
    pub fn to_json(&self) -> Value {
        // Body serializes to {"tipo": .., "payload": ..}; both derive from
        // plain data so serialization cannot fail.
        let tagged = serde_json::to_value(&self.body).unwrap_or(Value::Null);
        let (tipo, payload) = match tagged {
            Value::Object(mut m) => (
                m.remove("tipo").unwrap_or(Value::Null),
                m.remove("payload").unwrap_or_else(|| Value::Object(Map::new())),
            ),
            _ => (Value::Null, Value::Object(Map::new())),
        };

        let mut map = Map::new();
        map.insert("ver".into(), Value::from(self.version));
        map.insert("tipo".into(), tipo);
        map.insert(
            "token".into(),
            self.token.clone().map(Value::String).unwrap_or(Value::Null),
        );
        map.insert(
            "origen".into(),
            serde_json::to_value(&self.origin).unwrap_or(Value::Null),
        );
        map.insert("destino".into(), Value::String(self.destination.clone()));
        map.insert("payload".into(), payload);
        let mut meta = Map::new();
        meta.insert("ts".into(), Value::from(self.ts));
        map.insert("meta".into(), Value::Object(meta));
        Value::Object(map)
    }

    /// Encode to a self-delimited frame (length prefix + UTF-8 JSON).
    pub fn encode(&self) -> Vec<u8> {
        gwc_transport::frame(self.to_json().to_string().as_bytes())
    }

    /// Decode a complete frame.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let body = gwc_transport::unframe(frame)?;
        Self::from_json_bytes(body)
    }

    /// Decode an unframed JSON body.
    pub fn from_json_bytes(body: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(body).map_err(|e| DecodeError::Utf8 {
            valid_up_to: e.valid_up_to(),
        })?;
        let value: Value = serde_json::from_str(text).map_err(|e| DecodeError::Malformed {
            reason: e.to_string(),
        })?;
        let Value::Object(mut map) = value else {
            return Err(malformed("top level is not an object"));
        };

        for field in ["ver", "tipo", "origen", "destino", "payload"] {
            if !map.contains_key(field) {
                return Err(DecodeError::MissingField(field));
            }
        }

        let origen = map.remove("origen").unwrap_or(Value::Null);
        let Value::Object(ref origen_map) = origen else {
            return Err(malformed("`origen` is not an object"));
        };
        for field in ["uid", "nick", "ip"] {
            if !origen_map.contains_key(field) {
                return Err(DecodeError::IncompleteOrigen(field));
            }
        }

        let version = match map.get("ver").and_then(Value::as_i64) {
            Some(v) if v == i64::from(PROTOCOL_VERSION) => PROTOCOL_VERSION,
            Some(v) => {
                return Err(DecodeError::UnsupportedVersion {
                    found: v,
                    expected: PROTOCOL_VERSION,
                })
            }
            None => return Err(malformed("`ver` is not an integer")),
        };

        let tipo = map
            .get("tipo")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("`tipo` is not a string"))?;
        let kind: Kind = tipo
            .parse()
            .map_err(|_| DecodeError::UnknownKind(tipo.to_string()))?;

        let origin: Origin = serde_json::from_value(origen).map_err(|e| DecodeError::Malformed {
            reason: format!("`origen`: {e}"),
        })?;

        let destination = match map.remove("destino") {
            Some(Value::String(s)) => s,
            _ => return Err(malformed("`destino` is not a string")),
        };

        let token = match map.remove("token") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(_) => return Err(malformed("`token` is not a string")),
        };

        let ts = map
            .get("meta")
            .and_then(|m| m.get("ts"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let payload = map.remove("payload").unwrap_or(Value::Null);
        let mut tagged = Map::new();
        tagged.insert("tipo".into(), Value::String(kind.as_str().to_string()));
        tagged.insert("payload".into(), payload);
        let body: Body =
            serde_json::from_value(Value::Object(tagged)).map_err(|e| DecodeError::InvalidPayload {
                kind: kind.as_str(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            version,
            token,
            origin,
            destination,
            body,
            ts,
        })
    }
}

fn malformed(reason: &str) -> DecodeError {
    DecodeError::Malformed {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn origin() -> Origin {
        Origin {
            uid: "a1b2c3d4e5f60718".into(),
            nick: "alice".into(),
            ip: "192.168.1.10".into(),
            status_msg: Some("Available".into()),
            port_priv: 44494,
            port_group: 44496,
        }
    }

    fn make_envelope(body: Body) -> Envelope {
        Envelope::new(origin(), "ALL", body)
    }

    fn raw_frame(value: Value) -> Vec<u8> {
        gwc_transport::frame(value.to_string().as_bytes())
    }

    fn valid_json() -> Value {
        json!({
            "ver": 2,
            "tipo": "WHO_NAME",
            "token": "",
            "origen": {"uid": "u1", "nick": "bob", "ip": "10.0.0.2"},
            "destino": "ALL",
            "payload": {"nick": "alice"},
            "meta": {"ts": 1700000000}
        })
    }

    #[test]
    fn roundtrip_json_frame() {
        let env = make_envelope(Body::Msg {
            text: "hola | mundo\n\"quoted\"".into(),
            gid: Some(GroupId::from("abc")),
        });
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn roundtrip_all_kinds_without_payload_fields() {
        for body in [
            Body::Iam {},
            Body::ChatReq {},
            Body::ChatAck {},
            Body::ChatBye {},
        ] {
            let env = make_envelope(body);
            let json = env.to_json();
            assert_eq!(json["payload"], json!({}));
            assert_eq!(Envelope::decode(&env.encode()).unwrap(), env);
        }
    }

    #[test]
    fn wire_shape_matches_field_names() {
        let env = make_envelope(Body::JoinReq {
            gid: GroupId::from("g1"),
            password_hash: None,
        })
        .with_token("t-1");
        let json = env.to_json();
        assert_eq!(json["ver"], 2);
        assert_eq!(json["tipo"], "JOIN_REQ");
        assert_eq!(json["token"], "t-1");
        assert_eq!(json["origen"]["nick"], "alice");
        assert_eq!(json["destino"], "ALL");
        assert_eq!(json["payload"], json!({"gid": "g1", "password_hash": null}));
        assert!(json["meta"]["ts"].as_u64().is_some());
    }

    #[test]
    fn found_payload_is_type_tagged() {
        let env = make_envelope(Body::Found(Found::Group {
            name: "Sala X".into(),
            gid: GroupId::from("g"),
        }));
        assert_eq!(
            env.to_json()["payload"],
            json!({"type": "GROUP", "name": "Sala X", "gid": "g"})
        );
        let peer = make_envelope(Body::Found(Found::Peer {
            status: "ONLINE".into(),
        }));
        assert_eq!(
            peer.to_json()["payload"],
            json!({"type": "PEER", "status": "ONLINE"})
        );
    }

    #[test]
    fn decodes_minimal_foreign_envelope() {
        let env = Envelope::decode(&raw_frame(valid_json())).unwrap();
        assert_eq!(env.kind(), Kind::WhoName);
        assert_eq!(env.token.as_deref(), Some(""));
        assert_eq!(env.origin.status_msg, None);
        assert_eq!(env.origin.port_priv, 0);
        assert_eq!(env.ts, 1_700_000_000);
        assert_eq!(
            env.body,
            Body::WhoName {
                nick: "alice".into()
            }
        );
    }

    #[test]
    fn discover_filter_defaults_to_all() {
        let mut v = valid_json();
        v["tipo"] = json!("DISCOVER");
        v["payload"] = json!({});
        let env = Envelope::decode(&raw_frame(v)).unwrap();
        assert_eq!(
            env.body,
            Body::Discover {
                filter: DiscoverFilter::All
            }
        );
    }

    #[test]
    fn missing_origen_ip_rejected() {
        let mut v = valid_json();
        v["origen"].as_object_mut().unwrap().remove("ip");
        assert_eq!(
            Envelope::decode(&raw_frame(v)),
            Err(DecodeError::IncompleteOrigen("ip"))
        );
    }

    #[test]
    fn next_version_rejected() {
        let mut v = valid_json();
        v["ver"] = json!(3);
        assert_eq!(
            Envelope::decode(&raw_frame(v)),
            Err(DecodeError::UnsupportedVersion {
                found: 3,
                expected: 2
            })
        );
    }

    #[test]
    fn each_required_field_checked() {
        for field in ["ver", "tipo", "origen", "destino", "payload"] {
            let mut v = valid_json();
            v.as_object_mut().unwrap().remove(field);
            assert_eq!(
                Envelope::decode(&raw_frame(v)),
                Err(DecodeError::MissingField(field))
            );
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        let mut v = valid_json();
        v["tipo"] = json!("FILE_OFFER");
        assert_eq!(
            Envelope::decode(&raw_frame(v)),
            Err(DecodeError::UnknownKind("FILE_OFFER".into()))
        );
    }

    #[test]
    fn payload_shape_checked() {
        let mut v = valid_json();
        v["tipo"] = json!("JOIN_REQ");
        v["payload"] = json!({"password_hash": "x"});
        assert!(matches!(
            Envelope::decode(&raw_frame(v)),
            Err(DecodeError::InvalidPayload {
                kind: "JOIN_REQ",
                ..
            })
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let frame = gwc_transport::frame(&[b'{', 0xff, 0xfe, b'}']);
        assert_eq!(
            Envelope::decode(&frame),
            Err(DecodeError::Utf8 { valid_up_to: 1 })
        );
    }

    #[test]
    fn bad_framing_rejected() {
        let mut frame = make_envelope(Body::Iam {}).encode();
        frame.truncate(frame.len() - 1);
        assert!(matches!(
            Envelope::decode(&frame),
            Err(DecodeError::Framing(_))
        ));
        assert!(matches!(
            Envelope::decode(&[1, 2]),
            Err(DecodeError::Framing(_))
        ));
    }

    #[test]
    fn non_object_rejected() {
        assert!(matches!(
            Envelope::decode(&raw_frame(json!([1, 2, 3]))),
            Err(DecodeError::Malformed { .. })
        ));
        assert!(matches!(
            Envelope::from_json_bytes(b"{not json"),
            Err(DecodeError::Malformed { .. })
        ));
    }
}
