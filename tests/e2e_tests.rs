/*!
 * End-to-End Pipeline Tests
 *
 * These tests exercise the full relay path with real components:
 * - The ingress router served on an ephemeral port (signature
 *   verification, upsert, enqueue)
 * - The real Postgres store and job queue
 * - The worker pipeline with the Graph API and Discord replaced by
 *   wiremock servers
 *
 * What these tests DO:
 * ✅ Drive webhook deliveries through ingress into the queue
 * ✅ Run claimed jobs through the pipeline against mock externals
 * ✅ Assert row status, audit events, delivery logs, and sink call counts
 *
 * What these tests DO NOT:
 * ❌ Run the compiled service binaries
 * ❌ Talk to the real Graph API or Discord
 *
 * Requirements:
 * - PostgreSQL running, DATABASE_URL set (migrations are applied here)
 *
 * Run with: cargo test --test e2e_tests -- --ignored --test-threads=1
 */

use chrono::Utc;
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pagerelay_common::{PgQueue, PostStore, PROCESS_POST_QUEUE, sign};
use pagerelay_domain::PostStatus;
use pagerelay_ingress::{AppState, IngressConfig, build_router};
use pagerelay_worker::{DiscordClient, GraphClient, PostPipeline, WorkerConfig};

const APP_SECRET: &str = "e2e_app_secret";
const VERIFY_TOKEN: &str = "e2e_verify_token";
const PAGE_ID: &str = "1234567890";

/// Everything one scenario needs.
struct Harness {
    pool: PgPool,
    store: PostStore,
    queue: PgQueue,
    ingress_base: String,
    graph: MockServer,
    discord: MockServer,
    config: WorkerConfig,
}

impl Harness {
    async fn new() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for e2e tests");
        let pool = PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::migrate!("../migrations")
            .run(&pool)
            .await
            .expect("Failed to apply migrations");

        // Each scenario starts from a clean slate.
        sqlx::query("TRUNCATE posts CASCADE")
            .execute(&pool)
            .await
            .expect("truncate posts");
        sqlx::query("TRUNCATE relay_jobs")
            .execute(&pool)
            .await
            .expect("truncate relay_jobs");

        let graph = MockServer::start().await;
        let discord = MockServer::start().await;

        let config = WorkerConfig {
            database_url: database_url.clone(),
            database_max_connections: 5,
            graph: pagerelay_worker::GraphSettings {
                base_url: graph.uri(),
                version: "v21.0".to_string(),
                page_id: PAGE_ID.to_string(),
                access_token: "e2e_token".to_string(),
                app_secret: APP_SECRET.to_string(),
            },
            discord_webhook_url: format!("{}/webhook", discord.uri()),
            discord_wait: true,
            discord_disclaimer: "Not financial advice.".to_string(),
            discord_mention_role_id: Some("555".to_string()),
            alerts_enabled: true,
            trigger_tag: "#discord".to_string(),
            max_post_age_minutes: 0,
            channel_routes: Default::default(),
            channel_priority: Vec::new(),
            batch_size: 5,
            poll_interval_secs: 1,
            queue_max_attempts: 5,
            queue_archive_days: 7,
            post_retention_days: 30,
            health_port: 0,
        };

        let queue = PgQueue::new(pool.clone(), PROCESS_POST_QUEUE, config.queue_max_attempts);
        let store = PostStore::new(pool.clone());

        // Serve the real ingress router on an ephemeral port.
        let ingress_config = IngressConfig {
            port: 0,
            verify_token: VERIFY_TOKEN.to_string(),
            app_secret: APP_SECRET.to_string(),
            max_post_age_minutes: 0,
            queue_max_attempts: config.queue_max_attempts,
            database_url,
            database_max_connections: 5,
        };
        let state = AppState {
            store: PostStore::new(pool.clone()),
            pool: pool.clone(),
            queue: queue.clone(),
            config: Arc::new(ingress_config),
        };
        let app = build_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            pool,
            store,
            queue,
            ingress_base: format!("http://{addr}"),
            graph,
            discord,
            config,
        }
    }

    fn pipeline(&self) -> PostPipeline {
        self.pipeline_with_dispatch_timeout(Duration::from_secs(30))
    }

    fn pipeline_with_dispatch_timeout(&self, timeout: Duration) -> PostPipeline {
        let graph = GraphClient::new(&self.config.graph).expect("graph client");
        let discord = DiscordClient::new(&self.config)
            .expect("discord client")
            .with_timeout(timeout);
        PostPipeline::new(
            PostStore::new(self.pool.clone()),
            graph,
            discord,
            self.config.alerts_enabled,
            self.config.max_post_age_minutes,
        )
    }

    /// POST a signed webhook for one new feed post.
    async fn post_webhook(&self, post_id: &str, message: &str) -> reqwest::Response {
        let body = webhook_body(post_id, message);
        self.post_webhook_raw(&body, &format!("sha256={}", sign(body.as_bytes(), APP_SECRET)))
            .await
    }

    async fn post_webhook_raw(&self, body: &str, signature: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/meta/webhook", self.ingress_base))
            .header("X-Hub-Signature-256", signature)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("webhook request failed")
    }

    /// One consumer pass: claim due jobs, process sequentially, settle.
    async fn drain(&self, pipeline: &PostPipeline) -> usize {
        let jobs = self.queue.dequeue(self.config.batch_size).await.unwrap();
        let count = jobs.len();
        for job in jobs {
            let parsed = job.parse_payload().unwrap();
            match pipeline.process(&parsed).await {
                Ok(()) => self.queue.complete(&job).await.unwrap(),
                Err(e) => {
                    self.queue.retry(&job, &e.to_string()).await.unwrap();
                }
            }
        }
        count
    }

    /// Mount the happy-path Graph response for a post.
    async fn mock_graph_post(&self, post_id: &str, message: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v21.0/{post_id}")))
            .and(query_param("access_token", "e2e_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": post_id,
                "message": message,
                "permalink_url": format!("https://www.facebook.com/{PAGE_ID}/posts/444444444"),
                "created_time": graph_time(Utc::now().timestamp()),
                "from": {"id": PAGE_ID, "name": "Example Page"},
            })))
            .mount(&self.graph)
            .await;
    }

    /// Mount a Discord webhook response.
    async fn mock_discord(&self, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .respond_with(template)
            .mount(&self.discord)
            .await;
    }

    async fn discord_call_count(&self) -> usize {
        self.discord.received_requests().await.unwrap().len()
    }

    async fn post_events(&self, post_id: &str) -> Vec<String> {
        sqlx::query_scalar::<_, String>(
            "SELECT event FROM post_events WHERE fb_post_id = $1 ORDER BY id",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .unwrap()
    }

    async fn live_job_count(&self) -> i64 {
        self.queue.depth().await.unwrap()
    }
}

fn webhook_body(post_id: &str, message: &str) -> String {
    serde_json::json!({
        "object": "page",
        "entry": [{
            "id": PAGE_ID,
            "time": Utc::now().timestamp(),
            "changes": [{
                "field": "feed",
                "value": {
                    "item": "status",
                    "post_id": post_id,
                    "verb": "add",
                    "message": message,
                    "from": {"id": PAGE_ID, "name": "Example Page"},
                    "created_time": Utc::now().timestamp(),
                    "published": 1
                }
            }]
        }]
    })
    .to_string()
}

/// Graph's `+0000` timestamp format.
fn graph_time(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .unwrap()
        .format("%Y-%m-%dT%H:%M:%S+0000")
        .to_string()
}

#[tokio::test]
#[serial]
#[ignore] // Requires PostgreSQL
async fn test_happy_path_webhook_to_delivered() {
    let harness = Harness::new().await;
    let post_id = format!("{PAGE_ID}_444444444");

    harness.mock_graph_post(&post_id, "Buy AAPL #discord").await;
    harness
        .mock_discord(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "999888777"})),
        )
        .await;

    let response = harness.post_webhook(&post_id, "Buy AAPL #discord").await;
    assert_eq!(response.status(), 200);

    let post = harness.store.find(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Received);

    assert_eq!(harness.drain(&harness.pipeline()).await, 1);

    let post = harness.store.find(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Delivered);
    assert_eq!(post.discord_msg_id.as_deref(), Some("999888777"));
    assert!(post.delivered_at.is_some());
    assert_eq!(post.message.as_deref(), Some("Buy AAPL #discord"));

    let events = harness.post_events(&post_id).await;
    for expected in [
        "webhook_received",
        "status_fetching",
        "status_eligible",
        "status_sending",
        "status_delivered",
    ] {
        assert!(events.contains(&expected.to_string()), "missing {expected}");
    }

    let delivery_success = sqlx::query_scalar::<_, bool>(
        "SELECT success FROM delivery_logs WHERE fb_post_id = $1",
    )
    .bind(&post_id)
    .fetch_one(&harness.pool)
    .await
    .unwrap();
    assert!(delivery_success);

    assert_eq!(harness.discord_call_count().await, 1);
}

#[tokio::test]
#[serial]
#[ignore] // Requires PostgreSQL
async fn test_post_without_tag_is_ignored() {
    let harness = Harness::new().await;
    let post_id = format!("{PAGE_ID}_555555555");

    harness.mock_graph_post(&post_id, "Just a regular post").await;

    harness.post_webhook(&post_id, "Just a regular post").await;
    harness.drain(&harness.pipeline()).await;

    let post = harness.store.find(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Ignored);

    let details = sqlx::query_scalar::<_, serde_json::Value>(
        "SELECT details FROM post_events WHERE fb_post_id = $1 AND event = 'status_ignored'",
    )
    .bind(&post_id)
    .fetch_one(&harness.pool)
    .await
    .unwrap();
    assert_eq!(details["reason"], "No trigger tag");

    // Zero sink calls
    assert_eq!(harness.discord_call_count().await, 0);
}

#[tokio::test]
#[serial]
#[ignore] // Requires PostgreSQL
async fn test_forged_signature_leaves_no_trace() {
    let harness = Harness::new().await;
    let post_id = format!("{PAGE_ID}_666666666");

    let body = webhook_body(&post_id, "Buy AAPL #discord");
    let response = harness
        .post_webhook_raw(&body, &format!("sha256={}", "0".repeat(64)))
        .await;
    assert_eq!(response.status(), 403);

    assert!(harness.store.find(&post_id).await.unwrap().is_none());
    assert_eq!(harness.live_job_count().await, 0);
}

#[tokio::test]
#[serial]
#[ignore] // Requires PostgreSQL
async fn test_duplicate_webhooks_deliver_once() {
    let harness = Harness::new().await;
    let post_id = format!("{PAGE_ID}_777777777");

    harness.mock_graph_post(&post_id, "Dedup me #discord").await;
    harness
        .mock_discord(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "111"})),
        )
        .await;

    // Same valid webhook twice in quick succession
    harness.post_webhook(&post_id, "Dedup me #discord").await;
    harness.post_webhook(&post_id, "Dedup me #discord").await;

    let row_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts WHERE fb_post_id = $1")
            .bind(&post_id)
            .fetch_one(&harness.pool)
            .await
            .unwrap();
    assert_eq!(row_count, 1);
    assert_eq!(harness.live_job_count().await, 1);

    harness.drain(&harness.pipeline()).await;
    assert_eq!(harness.discord_call_count().await, 1);

    // Replaying the webhook after delivery: no new job does any work
    harness.post_webhook(&post_id, "Dedup me #discord").await;
    harness.drain(&harness.pipeline()).await;
    assert_eq!(harness.discord_call_count().await, 1);

    let post = harness.store.find(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Delivered);
}

#[tokio::test]
#[serial]
#[ignore] // Requires PostgreSQL
async fn test_sink_rate_limit_marks_for_retry() {
    let harness = Harness::new().await;
    let post_id = format!("{PAGE_ID}_888888888");

    harness.mock_graph_post(&post_id, "Rate limit me #discord").await;
    harness
        .mock_discord(ResponseTemplate::new(429).insert_header("Retry-After", "5"))
        .await;

    harness.post_webhook(&post_id, "Rate limit me #discord").await;
    let before = Utc::now();
    harness.drain(&harness.pipeline()).await;

    let post = harness.store.find(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Received);
    assert_eq!(post.retry_count, 1);
    assert!(post.last_error.unwrap().contains("rate limited"));

    // The job is rescheduled in the future with at least the base delay
    let (state, scheduled_for): (String, chrono::DateTime<Utc>) = sqlx::query_as(
        "SELECT state::TEXT, scheduled_for FROM relay_jobs WHERE singleton_key = $1",
    )
    .bind(&post_id)
    .fetch_one(&harness.pool)
    .await
    .unwrap();
    assert_eq!(state, "retry");
    assert!(scheduled_for >= before + chrono::Duration::seconds(5));

    // The failed attempt was logged
    let logged = sqlx::query_scalar::<_, bool>(
        "SELECT success FROM delivery_logs WHERE fb_post_id = $1",
    )
    .bind(&post_id)
    .fetch_one(&harness.pool)
    .await
    .unwrap();
    assert!(!logged);
}

#[tokio::test]
#[serial]
#[ignore] // Requires PostgreSQL
async fn test_ambiguous_dispatch_parks_for_review() {
    let harness = Harness::new().await;
    let post_id = format!("{PAGE_ID}_999999999");

    harness.mock_graph_post(&post_id, "Maybe sent #discord").await;
    harness
        .mock_discord(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"id": "1"}))
                .set_delay(Duration::from_millis(300)),
        )
        .await;

    harness.post_webhook(&post_id, "Maybe sent #discord").await;
    harness
        .drain(&harness.pipeline_with_dispatch_timeout(Duration::from_millis(50)))
        .await;

    let post = harness.store.find(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::NeedsReview);
    assert!(post.discord_msg_id.is_none());

    // The job completed; nothing retries the dispatch automatically
    assert_eq!(harness.live_job_count().await, 0);
    let calls_after_first = harness.discord_call_count().await;
    harness.drain(&harness.pipeline()).await;
    assert_eq!(harness.discord_call_count().await, calls_after_first);
}

#[tokio::test]
#[serial]
#[ignore] // Requires PostgreSQL
async fn test_kill_switch_suppresses_without_state_change() {
    let mut harness = Harness::new().await;
    harness.config.alerts_enabled = false;
    let post_id = format!("{PAGE_ID}_121212121");

    harness.post_webhook(&post_id, "Suppressed #discord").await;
    harness.drain(&harness.pipeline()).await;

    let post = harness.store.find(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Received);

    // Job is gone, nothing was sent
    assert_eq!(harness.live_job_count().await, 0);
    assert_eq!(harness.discord_call_count().await, 0);
}

#[tokio::test]
#[serial]
#[ignore] // Requires PostgreSQL
async fn test_fetch_outage_falls_back_to_webhook_data() {
    let harness = Harness::new().await;
    let post_id = format!("{PAGE_ID}_131313131");

    // Graph is down; the webhook carried the message inline
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&harness.graph)
        .await;
    harness
        .mock_discord(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "424242"})),
        )
        .await;

    harness.post_webhook(&post_id, "Inline fallback #discord").await;
    harness.drain(&harness.pipeline()).await;

    let post = harness.store.find(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Delivered);
    assert_eq!(post.discord_msg_id.as_deref(), Some("424242"));
    // Reduced fidelity: no permalink without a successful fetch
    assert!(post.permalink.is_none());
}
