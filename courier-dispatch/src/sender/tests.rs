// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::Cursor;

use assert_matches::assert_matches;
use courier_crypto::address::SessionAddress;
use courier_crypto::attachment::ciphertext_len;
use courier_crypto::test_utils::TestDevice;
use courier_crypto::traits::{IdentityKeyStore, SessionStore};
use courier_crypto::{MemoryProtocolStore, Rng};
use futures_util::TryStreamExt;

use crate::address::DeviceAddress;
use crate::config::SenderConfig;
use crate::content::{Content, DataMessage, ReceiptKind, ReceiptMessage, SyncMessage};
use crate::events::SecurityEvent;
use crate::receiver::retrieve_attachment;
use crate::sender::{MessageSender, SendError};
use crate::test_utils::{Call, MockServer, ScriptedResponse, setup_logging};
use crate::transport::TransportError;

const ALICE: &str = "+14151111111";
const BOB: &str = "+14152222222";
const CAROL: &str = "+14153333333";
const DAVE: &str = "+14154444444";

fn setup(seed: u8) -> (MessageSender<MockServer, MemoryProtocolStore>, MockServer) {
    setup_logging();

    let local_address = DeviceAddress::primary(ALICE);
    let server = MockServer::new(local_address.clone(), Rng::from_seed([seed; 32]));
    let alice = server.register(ALICE, 1);

    let config = SenderConfig {
        local_address: Some(local_address),
        ..Default::default()
    };
    let sender = MessageSender::new(
        server.clone(),
        alice.store,
        Rng::from_seed([seed + 1; 32]),
        config,
    );
    (sender, server)
}

fn has_session(sender: &MessageSender<MockServer, MemoryProtocolStore>, device_id: u32) -> bool {
    sender
        .store()
        .contains_session(&SessionAddress::new(BOB, device_id))
        .unwrap()
}

#[tokio::test]
async fn establish_sessions_with_every_device() {
    let (sender, server) = setup(1);
    for device_id in [1, 2, 3] {
        server.register(BOB, device_id);
    }
    let mut events = sender.subscribe();

    sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(1, "hello"))
        .await
        .unwrap();

    assert_eq!(
        server.calls(),
        vec![
            Call::FetchBundles(BOB.into()),
            Call::Submit(BOB.into(), vec![1, 2, 3]),
        ]
    );

    let deliveries = server.deliveries();
    assert_eq!(deliveries.len(), 3);
    for (delivery, device_id) in deliveries.iter().zip([1, 2, 3]) {
        assert_eq!(delivery.device_id, device_id);
        assert_eq!(delivery.content, Content::Data(DataMessage::new(1, "hello")));
    }

    for device_id in [1, 2, 3] {
        assert!(has_session(&sender, device_id));
        assert_eq!(
            events.try_recv().unwrap(),
            SecurityEvent::SessionEstablished {
                recipient_id: BOB.into(),
                device_id,
            }
        );
    }

    // Established sessions are reused.
    server.clear_calls();
    sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(2, "again"))
        .await
        .unwrap();
    assert_eq!(server.calls(), vec![Call::Submit(BOB.into(), vec![1, 2, 3])]);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn extra_devices_are_dropped() {
    let (sender, server) = setup(2);
    server.register(BOB, 1);
    server.register(BOB, 5);
    sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(1, "hello"))
        .await
        .unwrap();

    server.remove_device(BOB, 5);
    server.clear_calls();

    sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(2, "hello"))
        .await
        .unwrap();

    assert_eq!(
        server.calls(),
        vec![
            Call::Submit(BOB.into(), vec![1, 5]),
            Call::Submit(BOB.into(), vec![1]),
        ]
    );
    assert!(has_session(&sender, 1));
    assert!(!has_session(&sender, 5));
}

#[tokio::test]
async fn missing_devices_are_fetched() {
    let (sender, server) = setup(3);
    server.register(BOB, 1);
    sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(1, "hello"))
        .await
        .unwrap();

    server.register(BOB, 7);
    server.clear_calls();
    server.clear_deliveries();

    sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(2, "hello"))
        .await
        .unwrap();

    assert_eq!(
        server.calls(),
        vec![
            Call::Submit(BOB.into(), vec![1]),
            Call::FetchBundle(BOB.into(), 7),
            Call::Submit(BOB.into(), vec![1, 7]),
        ]
    );
    assert!(has_session(&sender, 7));
    let devices: Vec<u32> = server
        .deliveries()
        .iter()
        .map(|delivery| delivery.device_id)
        .collect();
    assert_eq!(devices, vec![1, 7]);
}

#[tokio::test]
async fn stale_devices_are_dropped() {
    let (sender, server) = setup(4);
    server.register(BOB, 1);
    server.register(BOB, 3);
    sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(1, "hello"))
        .await
        .unwrap();

    server.reregister(BOB, 3);
    server.clear_calls();
    server.clear_deliveries();

    sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(2, "after"))
        .await
        .unwrap();

    // The stale session is deleted without fetching, the next attempt learns about the
    // re-registered device from the mismatch.
    assert_eq!(
        server.calls(),
        vec![
            Call::Submit(BOB.into(), vec![1, 3]),
            Call::Submit(BOB.into(), vec![1]),
            Call::FetchBundle(BOB.into(), 3),
            Call::Submit(BOB.into(), vec![1, 3]),
        ]
    );
    let deliveries = server.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[1].device_id, 3);
    assert_eq!(deliveries[1].content, Content::Data(DataMessage::new(2, "after")));
}

#[tokio::test]
async fn retries_exhausted() {
    let (sender, server) = setup(5);
    server.register(BOB, 1);
    for _ in 0..3 {
        server.push_response(ScriptedResponse::Status(
            410,
            br#"{"staleDevices":[]}"#.to_vec(),
        ));
    }

    let result = sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(1, "hello"))
        .await;

    assert_matches!(
        &result,
        Err(SendError::RetriesExhausted { recipient, attempts: 3 }) if recipient == BOB
    );
    assert!(result.unwrap_err().is_retryable());
    let submits = server
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Submit(..)))
        .count();
    assert_eq!(submits, 3);
    assert!(server.deliveries().is_empty());
}

#[tokio::test]
async fn transport_errors() {
    let (sender, server) = setup(6);
    server.register(BOB, 1);

    server.push_response(ScriptedResponse::NetworkFailure);
    let err = sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(1, "hello"))
        .await
        .unwrap_err();
    assert_matches!(err, SendError::Transport(TransportError::Network(_)));
    assert!(err.is_retryable());

    server.push_response(ScriptedResponse::Status(413, Vec::new()));
    let err = sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(2, "hello"))
        .await
        .unwrap_err();
    assert_matches!(err, SendError::Transport(TransportError::RateLimited));
    assert!(err.is_retryable());

    let err = sender
        .send_message(&DeviceAddress::primary(CAROL), DataMessage::new(3, "hello"))
        .await
        .unwrap_err();
    assert_matches!(
        &err,
        SendError::Transport(TransportError::UnregisteredUser(user)) if user == CAROL
    );
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn aggregate_failures() {
    let (sender, server) = setup(7);
    server.register(BOB, 1);
    server.register(CAROL, 1);

    // Pin a different identity for Bob.
    let rng = Rng::from_seed([70; 32]);
    let impostor = TestDevice::generate(1, &rng);
    sender
        .store()
        .save_identity(BOB, impostor.identity.public_key())
        .unwrap();

    let recipients = [DeviceAddress::primary(BOB), DeviceAddress::primary(CAROL)];
    let err = sender
        .send_to_recipients(&recipients, DataMessage::new(1, "hello"))
        .await
        .unwrap_err();

    assert_matches!(err, SendError::Aggregate(aggregate) => {
        assert_eq!(aggregate.untrusted_identities.len(), 1);
        assert_eq!(aggregate.untrusted_identities[0].recipient_id, BOB);
        assert!(aggregate.unregistered_users.is_empty());
        assert!(aggregate.network_failures.is_empty());
    });

    let deliveries = server.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].destination, CAROL);
}

#[tokio::test]
async fn aggregate_collects_unregistered_and_network_failures() {
    let (sender, server) = setup(8);
    server.register(BOB, 1);
    server.register(CAROL, 1);

    // Consumed by the first submission, which is Bob's.
    server.push_response(ScriptedResponse::NetworkFailure);

    let recipients = [
        DeviceAddress::primary(BOB),
        DeviceAddress::primary("+14159999999"),
        DeviceAddress::primary(CAROL),
    ];
    let err = sender
        .send_to_recipients(&recipients, DataMessage::new(1, "hello"))
        .await
        .unwrap_err();

    assert_matches!(err, SendError::Aggregate(aggregate) => {
        assert!(aggregate.untrusted_identities.is_empty());
        assert_eq!(aggregate.unregistered_users, vec!["+14159999999".to_string()]);
        assert_eq!(aggregate.network_failures.len(), 1);
        assert_eq!(aggregate.network_failures[0].recipient_id, BOB);
    });
    assert_eq!(server.deliveries()[0].destination, CAROL);
}

#[tokio::test]
async fn aggregate_keeps_going_after_unsettled_devices() {
    let (sender, server) = setup(15);
    server.register(BOB, 1);
    server.register(CAROL, 1);
    server.register(DAVE, 1);

    // Pin a different identity for Bob, he fails before submitting anything.
    let rng = Rng::from_seed([71; 32]);
    let impostor = TestDevice::generate(1, &rng);
    sender
        .store()
        .save_identity(BOB, impostor.identity.public_key())
        .unwrap();

    // Consumed by every attempt for Carol.
    for _ in 0..3 {
        server.push_response(ScriptedResponse::Status(
            410,
            br#"{"staleDevices":[]}"#.to_vec(),
        ));
    }

    let recipients = [
        DeviceAddress::primary(BOB),
        DeviceAddress::primary(CAROL),
        DeviceAddress::primary(DAVE),
    ];
    let err = sender
        .send_to_recipients(&recipients, DataMessage::new(1, "hello"))
        .await
        .unwrap_err();

    assert_matches!(err, SendError::Aggregate(aggregate) => {
        assert_eq!(aggregate.untrusted_identities.len(), 1);
        assert_eq!(aggregate.untrusted_identities[0].recipient_id, BOB);
        assert_eq!(aggregate.retries_exhausted, vec![CAROL.to_string()]);
        assert!(aggregate.unregistered_users.is_empty());
        assert!(aggregate.network_failures.is_empty());
        assert!(aggregate.other_failures.is_empty());
    });

    let deliveries = server.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].destination, DAVE);
}

#[tokio::test]
async fn receipt_targets_exactly_one_device() {
    let (sender, server) = setup(9);
    server.register(BOB, 1);

    let address = DeviceAddress::new(BOB, 1, Some("foo".into()));
    sender.send_receipt(&address, 1_700_000_000_000).await.unwrap();

    assert_eq!(
        server.calls(),
        vec![
            Call::FetchBundle(BOB.into(), 1),
            Call::Submit(BOB.into(), vec![1]),
        ]
    );
    let deliveries = server.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].device_id, 1);
    assert_eq!(deliveries[0].relay.as_deref(), Some("foo"));
    assert_eq!(
        deliveries[0].content,
        Content::Receipt(ReceiptMessage {
            kind: ReceiptKind::Delivery,
            timestamps: vec![1_700_000_000_000],
        })
    );
}

#[tokio::test]
async fn end_session_resets_both_sides() {
    let (sender, server) = setup(10);
    let bob_1 = server.register(BOB, 1);
    let bob_2 = server.register(BOB, 2);
    sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(1, "hello"))
        .await
        .unwrap();
    server.clear_deliveries();
    let mut events = sender.subscribe();

    sender
        .send_end_session(&DeviceAddress::primary(BOB), 2)
        .await
        .unwrap();

    let deliveries = server.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries.iter().all(|delivery| delivery.content.is_end_session()));

    assert!(!has_session(&sender, 1));
    assert!(!has_session(&sender, 2));
    let alice = SessionAddress::new(ALICE, 1);
    assert!(!bob_1.store.contains_session(&alice).unwrap());
    assert!(!bob_2.store.contains_session(&alice).unwrap());
    assert_eq!(
        events.try_recv().unwrap(),
        SecurityEvent::SessionReset {
            recipient_id: BOB.into()
        }
    );

    // The next message starts over with fresh sessions.
    server.clear_calls();
    sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(3, "hello again"))
        .await
        .unwrap();
    assert_eq!(server.calls()[0], Call::FetchBundles(BOB.into()));
    assert_eq!(server.deliveries().len(), 4);
}

#[tokio::test]
async fn transcript_to_own_devices() {
    let (sender, server) = setup(11);
    server.register(ALICE, 2);
    server.register(BOB, 1);

    let message = DataMessage::new(1, "hello");
    sender
        .send_message(&DeviceAddress::primary(BOB), message.clone())
        .await
        .unwrap();

    // Our own primary device is the sender, the linked device is discovered from the mismatch.
    assert_eq!(
        server.calls(),
        vec![
            Call::FetchBundles(BOB.into()),
            Call::Submit(BOB.into(), vec![1]),
            Call::Submit(ALICE.into(), vec![]),
            Call::FetchBundle(ALICE.into(), 2),
            Call::Submit(ALICE.into(), vec![2]),
        ]
    );

    let deliveries = server.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[1].destination, ALICE);
    assert_eq!(deliveries[1].device_id, 2);
    assert_eq!(
        deliveries[1].content,
        Content::Sync(SyncMessage::Sent {
            destination: BOB.into(),
            timestamp: 1,
            message,
        })
    );
}

#[tokio::test]
async fn failed_transcript_keeps_delivery() {
    let (sender, server) = setup(16);
    server.register(ALICE, 2);
    server.register(BOB, 1);

    // Bob's submission goes through, the transcript to our own account fails.
    server.push_response(ScriptedResponse::Status(200, Vec::new()));
    server.push_response(ScriptedResponse::NetworkFailure);

    sender
        .send_to_recipients(&[DeviceAddress::primary(BOB)], DataMessage::new(1, "hello"))
        .await
        .unwrap();

    let deliveries = server.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].destination, BOB);
    assert_eq!(deliveries[0].device_id, 1);
}

#[tokio::test]
async fn no_transcript_without_linked_devices() {
    let (sender, server) = setup(12);
    server.register(BOB, 1);

    sender
        .send_message(&DeviceAddress::primary(BOB), DataMessage::new(1, "hello"))
        .await
        .unwrap();

    assert!(
        server
            .calls()
            .iter()
            .all(|call| !matches!(call, Call::Submit(destination, _) if destination == ALICE))
    );
}

#[tokio::test]
async fn message_to_own_account_skips_this_device() {
    let (sender, server) = setup(13);
    server.register(ALICE, 2);

    sender
        .send_message(&DeviceAddress::primary(ALICE), DataMessage::new(1, "note to self"))
        .await
        .unwrap();

    assert_eq!(
        server.calls(),
        vec![
            Call::Submit(ALICE.into(), vec![]),
            Call::FetchBundle(ALICE.into(), 2),
            Call::Submit(ALICE.into(), vec![2]),
        ]
    );
    assert_eq!(server.deliveries().len(), 1);
}

#[tokio::test]
async fn attachment_round_trip() {
    let (sender, server) = setup(14);
    server.register(BOB, 1);

    let plaintext: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
    let pointer = sender
        .upload_attachment(
            Cursor::new(plaintext.clone()),
            plaintext.len() as u64,
            "application/octet-stream",
        )
        .await
        .unwrap();

    assert_eq!(pointer.size, plaintext.len() as u64);
    let ciphertext = server.attachment(pointer.id).unwrap();
    assert_eq!(ciphertext.len() as u64, ciphertext_len(plaintext.len() as u64));

    sender
        .send_message(
            &DeviceAddress::primary(BOB),
            DataMessage::new(1, "photo").with_attachment(pointer),
        )
        .await
        .unwrap();

    let Content::Data(message) = &server.deliveries()[0].content else {
        panic!("expected data message");
    };
    let blocks: Vec<Vec<u8>> = retrieve_attachment(&server, &message.attachments[0], None)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks.concat(), plaintext);
}
