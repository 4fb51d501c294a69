use gwc_protocol::normalize::{group_id, normalize};
use gwc_protocol::{Body, DiscoverFilter, Envelope, Found, GroupId, Member, Origin, PeerStatus};
use proptest::prelude::*;

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,24}",
        "\\PC{0,24}",
        Just("Ñandú @Omar \"quoted\" \\ slash".to_string()),
    ]
}

fn arb_origin() -> impl Strategy<Value = Origin> {
    (
        "[0-9a-f]{16}",
        arb_text(),
        (any::<u8>(), any::<u8>()),
        proptest::option::of(arb_text()),
        any::<u16>(),
        any::<u16>(),
    )
        .prop_map(|(uid, nick, (c, d), status_msg, port_priv, port_group)| Origin {
            uid,
            nick,
            ip: format!("192.168.{c}.{d}"),
            status_msg,
            port_priv,
            port_group,
        })
}

fn arb_gid() -> impl Strategy<Value = GroupId> {
    "[0-9a-f]{64}".prop_map(GroupId)
}

fn arb_member() -> impl Strategy<Value = Member> {
    (arb_origin(), any::<bool>()).prop_map(|(origin, online)| {
        let mut member = Member::from(&origin);
        member.status = if online {
            PeerStatus::Online
        } else {
            PeerStatus::Offline
        };
        member
    })
}

/// Strategy for generating every payload shape.
fn arb_body() -> impl Strategy<Value = Body> {
    prop_oneof![
        arb_text().prop_map(|group_name| Body::Search { group_name }),
        (arb_text(), arb_gid()).prop_map(|(name, gid)| Body::Found(Found::Group { name, gid })),
        arb_text().prop_map(|status| Body::Found(Found::Peer { status })),
        prop_oneof![
            Just(DiscoverFilter::Peers),
            Just(DiscoverFilter::Groups),
            Just(DiscoverFilter::All),
            Just(DiscoverFilter::Ping),
        ]
        .prop_map(|filter| Body::Discover { filter }),
        arb_text().prop_map(|nick| Body::WhoName { nick }),
        Just(Body::Iam {}),
        (arb_gid(), proptest::option::of("[0-9a-f]{64}"))
            .prop_map(|(gid, password_hash)| Body::JoinReq { gid, password_hash }),
        (arb_gid(), arb_text()).prop_map(|(gid, name)| Body::Welcome { gid, name }),
        arb_gid().prop_map(|gid| Body::SyncReq { gid }),
        (arb_gid(), prop::collection::vec(arb_member(), 0..5))
            .prop_map(|(gid, members)| Body::Sync { gid, members }),
        (arb_gid(), arb_origin()).prop_map(|(gid, user)| Body::Announce { gid, user }),
        (arb_text(), proptest::option::of(arb_gid())).prop_map(|(text, gid)| Body::Msg { text, gid }),
        arb_gid().prop_map(|gid| Body::Leave { gid }),
        (arb_gid(), arb_text(), proptest::option::of("[0-9a-f]{64}")).prop_map(
            |(gid, name, password_hash)| Body::Invite {
                gid,
                name,
                password_hash
            }
        ),
        Just(Body::ChatReq {}),
        Just(Body::ChatAck {}),
        arb_text().prop_map(|reason| Body::ChatNo { reason }),
        Just(Body::ChatBye {}),
    ]
}

proptest! {
    /// Any well-formed envelope survives the JSON framing unchanged.
    #[test]
    fn encoded_envelopes_decode_identically(
        origin in arb_origin(),
        destination in arb_text(),
        body in arb_body(),
        token in proptest::option::of("[a-z0-9]{1,12}"),
        ts in 0..4_000_000_000u64,
    ) {
        let mut env = Envelope::new(origin, destination, body);
        env.token = token;
        env.ts = ts;

        let decoded = Envelope::decode(&env.encode()).expect("decode");
        prop_assert_eq!(&env, &decoded);
    }

    /// The decoder rejects garbage with an error, never a panic.
    #[test]
    fn arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Envelope::decode(&data);
        let _ = Envelope::from_json_bytes(&data);
    }

    /// Framed arbitrary JSON objects are also handled without panicking.
    #[test]
    fn arbitrary_json_objects_never_panic(
        keys in prop::collection::vec("(ver|tipo|origen|destino|payload|meta|x)", 0..7),
        values in prop::collection::vec(prop_oneof![
            Just(serde_json::json!(2)),
            Just(serde_json::json!("MSG")),
            Just(serde_json::json!({"uid": "a", "nick": "b", "ip": "1.2.3.4"})),
            Just(serde_json::json!(null)),
            Just(serde_json::json!([1, 2])),
            Just(serde_json::json!({})),
        ], 0..7),
    ) {
        let object: serde_json::Map<String, serde_json::Value> =
            keys.into_iter().zip(values).collect();
        let body = serde_json::to_vec(&object).expect("json");
        let _ = Envelope::decode(&gwc_transport::frame(&body));
    }

    /// Group ids ignore case and whitespace.
    #[test]
    fn group_id_stable_under_case_and_spacing(name in "[a-zA-Z]{1,12}( [a-zA-Z]{1,12}){0,2}") {
        let shouted = format!("  {}  ", name.to_uppercase());
        let squashed: String = name.split_whitespace().collect();
        prop_assert_eq!(group_id(&name), group_id(&shouted));
        prop_assert_eq!(group_id(&name), group_id(&squashed));
    }

    /// Normalizing twice changes nothing.
    #[test]
    fn normalize_is_idempotent(text in "[a-zA-Z0-9áéíóúüñÁÉÍÓÚÜÑ \t]{0,32}") {
        let once = normalize(&text);
        prop_assert_eq!(normalize(&once), once);
    }
}
