//! OpenAPI documentation configuration.
//!
//! The generated document is served as JSON at `/api/openapi.json`.

use utoipa::OpenApi;

use crate::api::models::{
    ComponentHealth, CreateNotificationRequest, FeedClientMessage, FeedServerMessage,
    HealthResponse, LivenessResponse, PushRequest, RegisterTokenRequest, UnregisterTokenResponse,
};
use crate::api::routes::logging::{
    LogFileInfo, LogFilesResponse, LoggingConfigResponse, ModuleInfo, UpdateLogFilterRequest,
};

/// OpenAPI documentation for the notifeed API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "notifeed API",
        version = "0.1.0",
        description = "Device token registration, push dispatch, and live notification feeds.",
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:12580", description = "Local development server")
    ),
    tags(
        (name = "health", description = "Health check endpoints for monitoring and orchestration"),
        (name = "devices", description = "Device token registration"),
        (name = "notifications", description = "Push dispatch and notification records"),
        (name = "feed", description = "Notification feed and read state"),
        (name = "logging", description = "Runtime log configuration")
    ),
    paths(
        crate::api::routes::health::health_check,
        crate::api::routes::health::readiness_check,
        crate::api::routes::health::liveness_check,
        crate::api::routes::devices::register_device_token,
        crate::api::routes::devices::get_device_token,
        crate::api::routes::devices::unregister_device_token,
        crate::api::routes::notifications::broadcast,
        crate::api::routes::notifications::push_to_user,
        crate::api::routes::notifications::create_notification,
        crate::api::routes::feed::get_feed,
        crate::api::routes::feed::mark_feed_opened,
        crate::api::routes::feed::feed_ws,
        crate::api::routes::logging::get_logging_config,
        crate::api::routes::logging::update_logging_config,
        crate::api::routes::logging::list_log_files,
    ),
    components(
        schemas(
            crate::api::error::ApiErrorResponse,
            HealthResponse,
            ComponentHealth,
            LivenessResponse,
            RegisterTokenRequest,
            UnregisterTokenResponse,
            PushRequest,
            CreateNotificationRequest,
            FeedClientMessage,
            FeedServerMessage,
            LoggingConfigResponse,
            ModuleInfo,
            UpdateLogFilterRequest,
            LogFileInfo,
            LogFilesResponse,
            crate::services::container::ServiceStats,
            crate::database::models::DeviceTokenDbModel,
            crate::database::models::NotificationRecord,
            crate::database::models::NotificationKind,
            crate::notification::SenderProfile,
            crate::notification::DispatchReport,
            crate::notification::SendOutcome,
            crate::notification::NotifyResult,
            crate::notification::FeedSnapshot,
            crate::notification::FeedChange,
            crate::notification::ReconcileOutcome,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_routes() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;
        assert!(paths.contains_key("/api/users/{user_id}/device-token"));
        assert!(paths.contains_key("/api/notifications/broadcast"));
        assert!(paths.contains_key("/api/users/{user_id}/feed"));
        assert!(paths.contains_key("/health"));
    }
}
