//! End-to-end pipeline tests wiring real modules into a session.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tradepost::crypto::Passthrough;
use tradepost::mdn;
use tradepost::message::{header, Payload};
use tradepost::mic::{DigestAlgorithm, Mic};
use tradepost::partnership::{attribute, id, Partnership};
use tradepost::processor::{action, Options};
use tradepost::resend::directory::DirectoryResendQueue;
use tradepost::resend::scanner::ResendScanner;
use tradepost::storage::StoreModule;
use tradepost::transport::{HttpResponse, InMemory};
use tradepost::{As2Sender, DispositionType, Message, Session};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn acme_to_globex() -> Partnership {
    Partnership::new("acme-to-globex")
        .with_sender_id(id::AS2_ID, "ACME")
        .with_receiver_id(id::AS2_ID, "GLOBEX")
        .with_attribute(attribute::AS2_URL, "http://globex.example/as2")
        .with_attribute(attribute::RETRIES, "2")
}

fn outbound_message() -> Message {
    Message::new()
        .with_partnership(
            Partnership::new("")
                .with_sender_id(id::AS2_ID, "ACME")
                .with_receiver_id(id::AS2_ID, "GLOBEX"),
        )
        .with_payload(Payload::new("application/edi-x12", b"ISA*00*order".to_vec()))
}

fn sync_mdn_response(payload: &[u8]) -> HttpResponse {
    let mic = Mic::compute(payload, DigestAlgorithm::Sha1);
    HttpResponse::ok()
        .with_header(
            header::DISPOSITION,
            "automatic-action/MDN-sent-automatically; processed",
        )
        .with_header(header::RECEIVED_CONTENT_MIC, mic.to_string())
        .with_header(header::MESSAGE_ID, "<mdn-1@GLOBEX_ACME>")
}

/// A send that fails on the wire is queued durably and succeeds on the next
/// scanner pass once the endpoint recovers.
#[tokio::test]
async fn failed_send_is_retried_from_the_durable_queue() {
    init_tracing();

    let session = Session::new();
    session.partnerships().add(acme_to_globex()).await;
    let processor = session.processor();

    let transport = InMemory::new();
    processor
        .register(Arc::new(As2Sender::new(
            session.partnerships().clone(),
            Passthrough,
            transport.clone(),
            processor,
        )))
        .await;

    let queue_dir = TempDir::new().unwrap();
    let queue = DirectoryResendQueue::open(queue_dir.path(), Duration::from_millis(0))
        .await
        .unwrap();
    processor
        .register_active(Arc::new(ResendScanner::new(
            queue.clone(),
            processor,
            Duration::from_millis(25),
        )))
        .await;

    // No scripted response yet: the first delivery attempt fails and the
    // sender schedules a resend.
    let mut message = outbound_message();
    assert!(processor
        .handle(action::SEND, &mut message, &Options::new())
        .await
        .is_err());
    assert_eq!(queue.pending().await.unwrap().len(), 1);

    // The endpoint comes back before the scanner's next pass.
    transport
        .push_response(sync_mdn_response(b"ISA*00*order"))
        .await;

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    session.shutdown().await;

    let requests = transport.sent_requests().await;
    assert_eq!(requests.len(), 2, "initial attempt plus one retry");
    assert_eq!(requests[1].headers.get(header::AS2_FROM).unwrap(), "ACME");
    assert!(queue.pending().await.unwrap().is_empty());
}

/// Inbound flow: resolve the partnership from the swapped direction, build
/// the receipt, and archive payload and receipt through the processor.
#[tokio::test]
async fn inbound_message_is_receipted_and_archived() {
    init_tracing();

    let session = Session::new();
    session.partnerships().add(acme_to_globex()).await;
    let processor = session.processor();

    let archive_dir = TempDir::new().unwrap();
    processor
        .register(Arc::new(StoreModule::open(archive_dir.path()).await.unwrap()))
        .await;

    // The wire direction is GLOBEX -> ACME, the inverse of the stored pair.
    let mut message = Message::new()
        .with_partnership(
            Partnership::new("")
                .with_sender_id(id::AS2_ID, "GLOBEX")
                .with_receiver_id(id::AS2_ID, "ACME"),
        )
        .with_payload(Payload::new("application/edi-x12", b"ISA*00*invoice".to_vec()));
    message.set_message_id("<inbound-1@GLOBEX_ACME>");
    message.set_header(header::AS2_FROM, "GLOBEX");
    message.set_header(header::AS2_TO, "ACME");
    message.set_header(
        header::DISPOSITION_NOTIFICATION_OPTIONS,
        "signed-receipt-protocol=required,pkcs7-signature; signed-receipt-micalg=required,sha-256",
    );

    let resolved = session
        .partnerships()
        .resolve(message.partnership())
        .await
        .unwrap();
    assert_eq!(resolved.name(), "acme-to-globex-inverse");
    message.partnership_mut().copy_from(&resolved);

    let receipt = mdn::create_receipt(&message, DispositionType::success()).unwrap();
    let mic = Mic::parse(receipt.mic.as_deref().unwrap()).unwrap();
    assert_eq!(mic.algorithm(), DigestAlgorithm::Sha256);
    message.attach_mdn(receipt);

    processor
        .handle(action::STORE, &mut message, &Options::new())
        .await
        .unwrap();
    processor
        .handle(action::STORE_MDN, &mut message, &Options::new())
        .await
        .unwrap();

    let mut names: Vec<_> = std::fs::read_dir(archive_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names[0].starts_with("_inbound-1_GLOBEX_ACME_"));
    assert!(names[1].ends_with(".mdn.json"));
}
