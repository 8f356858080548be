//! Application Startup
//!
//! Wires the four logical services into one process: broker + RPC
//! client, queue consumers for auth/user/mail, the presence registry,
//! and the gateway HTTP/WebSocket surface.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::application::services::{
    AuthService, ChatService, DeliveryService, MailService, SeenSyncService,
};
use crate::config::Settings;
use crate::infrastructure::broker::{
    decode_payload, ActionTable, Broker, ConsumerHandle, MemoryBroker, QueueConsumer, RedisBroker,
    RpcClient,
};
use crate::infrastructure::cache::{self, RedisCache};
use crate::infrastructure::database;
use crate::infrastructure::mail::LogMailer;
use crate::infrastructure::objects::{LocalObjectStore, ObjectUploader};
use crate::infrastructure::repositories::{
    PgConversationRepository, PgMessageRepository, PgUserRepository,
};
use crate::presentation::http::routes;
use crate::presentation::middleware::create_cors_layer;
use crate::realtime::PresenceRegistry;

type PgAuthService = AuthService<PgUserRepository, RedisCache>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: ConnectionManager,
    pub settings: Arc<Settings>,
    pub presence: Arc<PresenceRegistry>,
    pub rpc: Arc<RpcClient>,
    pub uploader: Arc<dyn ObjectUploader>,
}

impl AppState {
    pub fn conversations(&self) -> Arc<PgConversationRepository> {
        Arc::new(PgConversationRepository::new(self.db.clone()))
    }

    pub fn messages(&self) -> Arc<PgMessageRepository> {
        Arc::new(PgMessageRepository::new(self.db.clone()))
    }

    pub fn chat_service(&self) -> ChatService<PgConversationRepository, PgMessageRepository> {
        ChatService::new(
            self.conversations(),
            self.messages(),
            self.rpc.clone(),
            self.settings.broker.user_queue.clone(),
        )
    }

    pub fn delivery_service(
        &self,
    ) -> DeliveryService<PgConversationRepository, PgMessageRepository> {
        DeliveryService::new(self.conversations(), self.messages(), self.presence.clone())
    }

    pub fn seen_sync_service(
        &self,
    ) -> SeenSyncService<PgConversationRepository, PgMessageRepository> {
        SeenSyncService::new(self.conversations(), self.messages(), self.presence.clone())
    }
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    consumers: Vec<ConsumerHandle>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        // Database
        let db = database::create_pool(&settings.database).await?;
        database::run_migrations(&db).await?;
        tracing::info!("Database connection pool created");

        // Redis
        let redis = cache::create_redis_client(&settings.redis).await?;
        tracing::info!("Redis connection established");

        // Broker: one channel-owning handle shared by the RPC client and
        // every queue consumer in this process
        let broker: Arc<dyn Broker> = match settings.broker.driver.as_str() {
            "memory" => Arc::new(MemoryBroker::new()),
            _ => Arc::new(RedisBroker::new(redis.clone())),
        };
        let rpc = Arc::new(RpcClient::new(
            broker.clone(),
            Duration::from_secs(settings.broker.rpc_timeout_secs),
        ));

        // Real-time registry
        let presence = Arc::new(PresenceRegistry::new());

        // Uploads
        let uploader: Arc<dyn ObjectUploader> = Arc::new(LocalObjectStore::new(
            settings.uploads.root.clone(),
            settings.uploads.public_base_url.clone(),
        ));

        // Auth/user/mail services behind their queues
        let users = Arc::new(PgUserRepository::new(db.clone()));
        let auth_cache = Arc::new(RedisCache::with_prefix(redis.clone(), "sayhi:"));
        let auth = Arc::new(AuthService::new(
            users,
            auth_cache,
            rpc.clone(),
            settings.jwt.clone(),
            settings.broker.mail_queue.clone(),
        ));
        let mail = Arc::new(MailService::new(Arc::new(LogMailer::new(
            settings.mail.from.clone(),
        ))));

        let consumer = QueueConsumer::new(broker.clone(), settings.broker.prefetch);
        let consumers = vec![
            consumer
                .bind(&settings.broker.auth_queue, auth_actions(auth.clone()), true)
                .await?,
            consumer
                .bind(&settings.broker.user_queue, user_actions(auth), true)
                .await?,
            consumer
                .bind(&settings.broker.mail_queue, mail_actions(mail), true)
                .await?,
        ];

        // Gateway state and router
        let state = AppState {
            db,
            redis,
            settings: Arc::new(settings.clone()),
            presence,
            rpc,
            uploader,
        };
        let router = routes::create_router(state)
            .layer(TraceLayer::new_for_http())
            .layer(create_cors_layer(&settings.cors));

        let addr = settings.server.socket_addr();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self {
            listener,
            router,
            consumers,
        })
    }

    /// Queues this process is consuming
    pub fn bound_queues(&self) -> Vec<&str> {
        self.consumers.iter().map(|c| c.queue()).collect()
    }

    /// Run the server until stopped
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

fn auth_actions(auth: Arc<PgAuthService>) -> ActionTable {
    ActionTable::new()
        .register("register", {
            let auth = auth.clone();
            move |data| {
                let auth = auth.clone();
                async move { auth.register(decode_payload(data)?).await }
            }
        })
        .register("login", {
            let auth = auth.clone();
            move |data| {
                let auth = auth.clone();
                async move { auth.login(decode_payload(data)?).await }
            }
        })
        .register("verify_otp", {
            let auth = auth.clone();
            move |data| {
                let auth = auth.clone();
                async move { auth.verify_otp(decode_payload(data)?).await }
            }
        })
        .register("resend_otp", {
            let auth = auth.clone();
            move |data| {
                let auth = auth.clone();
                async move { auth.resend_otp(decode_payload(data)?).await }
            }
        })
        .register("logout", {
            let auth = auth.clone();
            move |data| {
                let auth = auth.clone();
                async move { auth.logout(decode_payload(data)?).await }
            }
        })
}

fn user_actions(auth: Arc<PgAuthService>) -> ActionTable {
    ActionTable::new().register("get_user_by_id", move |data| {
        let auth = auth.clone();
        async move { auth.get_user_by_id(decode_payload(data)?).await }
    })
}

fn mail_actions(mail: Arc<MailService<LogMailer>>) -> ActionTable {
    ActionTable::new().register("send_mail", move |data| {
        let mail = mail.clone();
        async move { mail.send_mail(data).await }
    })
}
