//! End-to-end API scenarios against the router with in-process backends.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;
use vault_common::OrgId;
use vault_core::state::AppState;
use vault_crypto::{MasterCipher, MessageKey, Signer};
use vault_db::Database;
use vault_export::TextRenderer;
use vault_index::MemoryIndex;
use vault_store::{EncryptedBlobStore, MemoryBlobStore};

const API_KEY: &str = "test-api-key";

struct Harness {
    router: Router,
    state: AppState,
    raw_store: MemoryBlobStore,
    _export_dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let raw_store = MemoryBlobStore::new();
    let cipher = Arc::new(MasterCipher::derive("master-secret"));
    let store = Arc::new(EncryptedBlobStore::new(raw_store.clone(), cipher));
    let index = Arc::new(MemoryIndex::new());
    let db = Database::open_in_memory().unwrap();
    let export_dir = tempfile::TempDir::new().unwrap();

    let state = AppState::build(
        store,
        index,
        db,
        Arc::new(Signer::new("signing-secret")),
        API_KEY.to_string(),
        OrgId(1),
        export_dir.path().to_path_buf(),
        Arc::new(TextRenderer),
    );
    let router = vault_core::router(state.clone());
    Harness { router, state, raw_store, _export_dir: export_dir }
}

async fn request(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
    with_key: bool,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if with_key {
        builder = builder.header("X-API-Key", API_KEY);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

/// Build a sync item the way the edge agent does: strip, seal, base64.
fn sync_item(
    id: &str,
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
    date: &str,
) -> (serde_json::Value, MessageKey) {
    let raw = format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nDate: {date}\r\n\
         Message-ID: <{id}@journal>\r\n\r\n{body}\r\n"
    );
    let stripped = vault_mime::strip_attachments(raw.as_bytes());
    let key = MessageKey::generate();
    let sealed = key.seal(&stripped.bytes);
    let item = serde_json::json!({
        "id": id,
        "key": key.encoded(),
        "metadata": {
            "from": stripped.headers.from,
            "to": stripped.headers.to,
            "subject": stripped.headers.subject,
            "date": stripped.headers.date,
            "message_id": stripped.headers.message_id,
            "envelope_from": from,
            "envelope_rcpt": [to],
            "size": raw.len(),
            "has_attachments": false,
            "body_text": stripped.body_text,
        },
        "blob_b64": BASE64.encode(sealed),
    });
    (item, key)
}

async fn ingest(harness: &Harness, items: Vec<serde_json::Value>) -> serde_json::Value {
    let (status, body) = request(
        &harness.router,
        "POST",
        "/api/v1/sync",
        Some(serde_json::json!({"batch": items})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "sync failed: {body}");
    body
}

#[tokio::test]
async fn ingest_and_search_round_trip() {
    let h = harness();
    let acme = h.state.tenants.create_org("Acme", "acme", &["acme.com".into()]).unwrap();

    let (item, _) = sync_item(
        "11111111-1111-1111-1111-111111111111",
        "alice@acme.com",
        "bob@acme.com",
        "Hello",
        "ping",
        "Tue, 01 Jul 2025 10:00:00 +0000",
    );
    let body = ingest(&h, vec![item]).await;
    assert_eq!(body["processed"], 1);

    let (status, results) = request(
        &h.router,
        "GET",
        &format!("/api/v1/messages?org_id={}&q=Hello", acme.id),
        None,
        false,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let hits = results["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], "11111111-1111-1111-1111-111111111111");
    assert_eq!(hits[0]["is_on_hold"], false);
    assert_eq!(hits[0]["sender_email"], "alice@acme.com");

    let (status, message) = request(
        &h.router,
        "GET",
        &format!(
            "/api/v1/messages/11111111-1111-1111-1111-111111111111?org_id={}",
            acme.id
        ),
        None,
        false,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(message["content"].as_str().unwrap().contains("ping"));
    assert!(message["raw"].as_str().unwrap().contains("Subject: Hello"));
}

#[tokio::test]
async fn cross_tenant_reads_are_denied() {
    let h = harness();
    let acme = h.state.tenants.create_org("Acme", "acme", &["acme.com".into()]).unwrap();
    let other = h.state.tenants.create_org("Other", "other", &["other.net".into()]).unwrap();

    let (item, _) = sync_item(
        "m-denied",
        "alice@acme.com",
        "bob@acme.com",
        "Secret",
        "classified",
        "Tue, 01 Jul 2025 10:00:00 +0000",
    );
    ingest(&h, vec![item]).await;

    let (status, _) = request(
        &h.router,
        "GET",
        &format!("/api/v1/messages/m-denied?org_id={}", other.id),
        None,
        false,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Same record is readable by its owner.
    let (status, _) = request(
        &h.router,
        "GET",
        &format!("/api/v1/messages/m-denied?org_id={}", acme.id),
        None,
        false,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // And the other tenant's search never surfaces it.
    let (_, results) = request(
        &h.router,
        "GET",
        &format!("/api/v1/messages?org_id={}&q=Secret", other.id),
        None,
        false,
    )
    .await;
    assert_eq!(results["hits"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn shared_domain_fans_out_to_both_tenants() {
    let h = harness();
    let org_a = h.state.tenants.create_org("Shared A", "shared-a", &["shared.com".into()]).unwrap();
    let org_b = h.state.tenants.create_org("Shared B", "shared-b", &["shared.com".into()]).unwrap();

    let (item, _) = sync_item(
        "m-shared",
        "sender@elsewhere.org",
        "x@shared.com",
        "Joint notice",
        "to both tenants",
        "Tue, 01 Jul 2025 10:00:00 +0000",
    );
    ingest(&h, vec![item]).await;

    // One blob, one index document, owning set covers both orgs.
    assert_eq!(h.raw_store.len(), 1);
    let doc = h.state.index.get("m-shared").await.unwrap().unwrap();
    assert!(doc.org_id.contains(&org_a.id));
    assert!(doc.org_id.contains(&org_b.id));

    for org in [org_a.id, org_b.id] {
        let (_, results) = request(
            &h.router,
            "GET",
            &format!("/api/v1/messages?org_id={org}&q=Joint"),
            None,
            false,
        )
        .await;
        assert_eq!(results["hits"].as_array().unwrap().len(), 1, "org {org} should see the hit");
    }

    // A hold in org A annotates org A's view only.
    let (status, _) = request(
        &h.router,
        "POST",
        &format!("/api/v1/admin/holds?org_id={}", org_a.id),
        Some(serde_json::json!({
            "name": "joint-investigation",
            "reason": "dispute",
            "filter_criteria": {"to": "x@shared.com"}
        })),
        false,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, view_a) = request(
        &h.router,
        "GET",
        &format!("/api/v1/messages?org_id={}&q=Joint", org_a.id),
        None,
        false,
    )
    .await;
    assert_eq!(view_a["hits"][0]["is_on_hold"], true);

    let (_, view_b) = request(
        &h.router,
        "GET",
        &format!("/api/v1/messages?org_id={}&q=Joint", org_b.id),
        None,
        false,
    )
    .await;
    assert_eq!(view_b["hits"][0]["is_on_hold"], false);
}

#[tokio::test]
async fn attachment_cas_flow_deduplicates_and_rehydrates() {
    let h = harness();
    let acme = h.state.tenants.create_org("Acme", "acme", &["acme.com".into()]).unwrap();

    let payload: Vec<u8> = (0..4096u32).flat_map(|i| i.to_le_bytes()).collect();
    let encoded = BASE64.encode(&payload);
    let build_raw = |id: &str| {
        format!(
            "From: alice@acme.com\r\nTo: bob@acme.com\r\nSubject: dup {id}\r\n\
             Date: Tue, 01 Jul 2025 10:00:00 +0000\r\nMIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"B\"\r\n\r\n\
             --B\r\nContent-Type: text/plain\r\n\r\nsee attachment\r\n\
             --B\r\nContent-Type: application/pdf; name=\"p.pdf\"\r\n\
             Content-Disposition: attachment; filename=\"p.pdf\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n{encoded}\r\n--B--\r\n"
        )
    };

    let mut items = Vec::new();
    let mut cas_sha = String::new();
    for id in ["dup-1", "dup-2"] {
        let raw = build_raw(id);
        let stripped = vault_mime::strip_attachments(raw.as_bytes());
        cas_sha = stripped.cas_parts[0].sha256.clone();
        let key = MessageKey::generate();
        items.push(serde_json::json!({
            "id": id,
            "key": key.encoded(),
            "metadata": {
                "from": "alice@acme.com",
                "to": "bob@acme.com",
                "subject": format!("dup {id}"),
                "date": "Tue, 01 Jul 2025 10:00:00 +0000",
                "envelope_from": "alice@acme.com",
                "envelope_rcpt": ["bob@acme.com"],
                "has_attachments": true,
                "cas_refs": [stripped.cas_parts[0].sha256],
            },
            "blob_b64": BASE64.encode(key.seal(&stripped.bytes)),
        }));
    }

    // Phase A: check reports missing, upload once, check reports present.
    let (_, check) = request(
        &h.router,
        "POST",
        "/api/v1/cas/check",
        Some(serde_json::json!({"hashes": [cas_sha]})),
        true,
    )
    .await;
    assert_eq!(check[&cas_sha], false);

    let (_, upload) = request(
        &h.router,
        "POST",
        "/api/v1/cas/upload",
        Some(serde_json::json!({"batch": [{"hash": cas_sha, "blob_b64": BASE64.encode(&payload)}]})),
        true,
    )
    .await;
    assert_eq!(upload["saved"], 1);

    let (_, check) = request(
        &h.router,
        "POST",
        "/api/v1/cas/check",
        Some(serde_json::json!({"hashes": [cas_sha]})),
        true,
    )
    .await;
    assert_eq!(check[&cas_sha], true);

    // Phase B, then both messages re-hydrate byte-identical payloads from
    // the single shared blob.
    ingest(&h, items).await;
    assert_eq!(h.raw_store.len(), 3); // 2 envelopes + 1 CAS blob

    for id in ["dup-1", "dup-2"] {
        let (status, message) = request(
            &h.router,
            "GET",
            &format!("/api/v1/messages/{id}?org_id={}", acme.id),
            None,
            false,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(message["warnings"].as_array().unwrap().len(), 0);
        let attachments = message["attachments"].as_array().unwrap();
        assert_eq!(attachments.len(), 1);
        let restored = BASE64.decode(attachments[0]["content_b64"].as_str().unwrap()).unwrap();
        assert_eq!(restored, payload);
    }
}

#[tokio::test]
async fn write_endpoints_require_the_api_key() {
    let h = harness();
    for uri in ["/api/v1/sync", "/api/v1/cas/check", "/api/v1/cas/upload"] {
        let (status, _) =
            request(&h.router, "POST", uri, Some(serde_json::json!({"batch": [], "hashes": []})), false)
                .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri} should demand the key");
    }
}

#[tokio::test]
async fn message_verify_reports_tampering() {
    let h = harness();
    let acme = h.state.tenants.create_org("Acme", "acme", &["acme.com".into()]).unwrap();
    let (item, _) = sync_item(
        "m-verify",
        "a@acme.com",
        "b@acme.com",
        "Check",
        "payload",
        "Tue, 01 Jul 2025 10:00:00 +0000",
    );
    ingest(&h, vec![item]).await;

    let uri = format!("/api/v1/messages/m-verify/verify?org_id={}", acme.id);
    let (status, verdict) = request(&h.router, "GET", &uri, None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict["status"], "VALID");

    // Overwrite the stored ciphertext behind the at-rest layer.
    h.state
        .store
        .put("m-verify.enc", b"forged ciphertext")
        .await
        .unwrap();
    let (_, verdict) = request(&h.router, "GET", &uri, None, false).await;
    assert_eq!(verdict["status"], "TAMPERED");
    assert_eq!(verdict["verified"], false);
}

#[tokio::test]
async fn audit_chain_verify_endpoint_names_the_broken_entry() {
    let h = harness();
    let org = h.state.tenants.create_org("Acme", "acme", &[]).unwrap();
    let base = format!("/api/v1/admin/audit-logs?org_id={}", org.id);

    for action in ["A", "B", "C"] {
        let (status, _) = request(
            &h.router,
            "POST",
            &base,
            Some(serde_json::json!({"action": action, "details": {"step": action}})),
            false,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let verify_uri = format!("/api/v1/admin/audit-logs/verify?org_id={}", org.id);
    let (_, report) = request(&h.router, "GET", &verify_uri, None, false).await;
    assert_eq!(report["valid"], true);
    assert_eq!(report["log_count"], 3);

    // Rewrite entry B's details directly in the relational store.
    let victim_id: i64 = h
        .state
        .db
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT id FROM audit_logs WHERE action = 'B'",
                [],
                |r| r.get(0),
            )?)
        })
        .unwrap();
    h.state
        .db
        .with_conn(|conn| {
            conn.execute(
                "UPDATE audit_logs SET details = '{\"step\":\"forged\"}' WHERE id = ?1",
                [victim_id],
            )?;
            Ok(())
        })
        .unwrap();

    let (_, report) = request(&h.router, "GET", &verify_uri, None, false).await;
    assert_eq!(report["valid"], false);
    assert_eq!(
        report["error"],
        format!("content mismatch at id={victim_id}")
    );
}

#[tokio::test]
async fn hold_blocks_manual_retention_run() {
    let h = harness();
    let acme = h.state.tenants.create_org("Acme", "acme", &["acme.com".into()]).unwrap();

    // Two messages dated far in the past: one from the held custodian,
    // one from nobody special.
    let (held, _) = sync_item(
        "m-held",
        "alice@acme.com",
        "bob@acme.com",
        "Ancient held",
        "old mail",
        "Mon, 01 Jan 2001 00:00:00 +0000",
    );
    let (unheld, _) = sync_item(
        "m-unheld",
        "carol@acme.com",
        "bob@acme.com",
        "Ancient unheld",
        "old mail",
        "Mon, 01 Jan 2001 00:00:00 +0000",
    );
    ingest(&h, vec![held, unheld]).await;

    let (status, _) = request(
        &h.router,
        "POST",
        &format!("/api/v1/admin/retention?org_id={}", acme.id),
        Some(serde_json::json!({"name": "one-day", "domains": ["acme.com"], "retention_days": 1})),
        false,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        &h.router,
        "POST",
        &format!("/api/v1/admin/holds?org_id={}", acme.id),
        Some(serde_json::json!({
            "name": "keep-alice",
            "reason": "litigation",
            "filter_criteria": {"from": "alice@acme.com"}
        })),
        false,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, report) =
        request(&h.router, "POST", "/api/v1/admin/retention/run", None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["purged"], 1);
    assert!(report["skipped_held"].as_u64().unwrap() >= 1);
    assert!(h.state.index.get("m-held").await.unwrap().is_some());
    assert!(h.state.index.get("m-unheld").await.unwrap().is_none());
    assert!(h.raw_store.raw("m-unheld.enc").is_none());
}

#[tokio::test]
async fn case_export_produces_downloadable_archive() {
    let h = harness();
    let acme = h.state.tenants.create_org("Acme", "acme", &["acme.com".into()]).unwrap();
    let (item, _) = sync_item(
        "m-export",
        "alice@acme.com",
        "bob@acme.com",
        "Evidence",
        "exhibit A",
        "Tue, 01 Jul 2025 10:00:00 +0000",
    );
    ingest(&h, vec![item]).await;

    let case = h.state.cases.create(acme.id, "Matter 7", "export test").unwrap();
    h.state.cases.add_items(case.id, acme.id, &["m-export".into()]).unwrap();

    let (status, job) = request(
        &h.router,
        "POST",
        "/api/v1/admin/exports",
        Some(serde_json::json!({
            "case_id": case.id,
            "org_id": acme.id.0,
            "format": "native",
            "redact": false
        })),
        false,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{job}");
    assert_eq!(job["exported"], 1);

    let url = job["download_url"].as_str().unwrap().to_string();
    let response = h
        .router
        .clone()
        .oneshot(Request::builder().uri(&url).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    // Zip local-file magic.
    assert_eq!(&bytes[..2], b"PK");
}
