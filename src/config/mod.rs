//! Configuration management.

mod settings;

pub use settings::{
    BrokerSettings, CorsSettings, DatabaseSettings, JwtSettings, MailSettings, RedisSettings,
    ServerSettings, Settings, UploadSettings, MIN_JWT_SECRET_LENGTH,
};
