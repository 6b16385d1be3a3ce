use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::auth::auth_middleware;
use crate::bus::MessageBus;
use crate::channels::ChannelRegistry;
use crate::clock::Clock;
use crate::handlers::{
    board as board_handlers, channels as channel_handlers, invites as invite_handlers,
    presence as presence_handlers, workspaces as workspace_handlers,
};
use crate::kanban::BoardEngine;
use crate::membership::MembershipRegistry;
use crate::presence::PresenceTracker;
use crate::store::Store;
use crate::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub members: MembershipRegistry,
    pub channels: ChannelRegistry,
    pub bus: Arc<MessageBus>,
    pub presence: Arc<PresenceTracker>,
    pub board: Arc<BoardEngine>,
}

impl AppState {
    /// Wire every component over one store and one clock.
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: Config) -> Self {
        let members = MembershipRegistry::new(store.clone(), clock.clone(), &config);
        let channels = ChannelRegistry::new(store.clone(), clock.clone(), members.clone());
        let bus = MessageBus::new(
            store.clone(),
            clock.clone(),
            channels.clone(),
            config.channel_buffer_size,
        );
        let presence = PresenceTracker::new(
            clock.clone(),
            config.presence_timeout(),
            config.channel_buffer_size,
        );
        let board = BoardEngine::new(store, clock, members.clone());

        Self {
            config: Arc::new(config),
            members,
            channels,
            bus: Arc::new(bus),
            presence: Arc::new(presence),
            board: Arc::new(board),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    // Workspace routes
    let workspace_routes = Router::new()
        .route(
            "/",
            post(workspace_handlers::create_workspace).get(workspace_handlers::list_workspaces),
        )
        .route(
            "/:id",
            get(workspace_handlers::get_workspace).delete(workspace_handlers::delete_workspace),
        )
        .route("/:id/members", get(workspace_handlers::list_members))
        .route(
            "/:id/members/:user_id",
            patch(workspace_handlers::update_member_role),
        )
        .route("/:id/leave", post(workspace_handlers::leave_workspace))
        .route("/:id/invites", post(invite_handlers::create_invite))
        .route(
            "/:id/channels",
            get(channel_handlers::list_channels).post(channel_handlers::create_channel),
        )
        .route("/:id/presence", get(presence_handlers::online_users))
        .route("/:id/presence/ws", get(presence_handlers::presence_ws))
        .route(
            "/:id/tags",
            get(board_handlers::list_tags).post(board_handlers::create_tag),
        )
        .route(
            "/:id/tags/:tag_id",
            patch(board_handlers::update_tag).delete(board_handlers::delete_tag),
        );

    // Board routes (nested under workspaces)
    let board_routes = Router::new()
        .route("/", get(board_handlers::get_board))
        .route("/columns", post(board_handlers::create_column))
        .route(
            "/columns/:column_id",
            patch(board_handlers::update_column).delete(board_handlers::delete_column),
        )
        .route(
            "/columns/:column_id/reorder",
            post(board_handlers::reorder_column),
        )
        .route("/cards", post(board_handlers::create_card))
        .route(
            "/cards/:card_id",
            patch(board_handlers::update_card).delete(board_handlers::delete_card),
        )
        .route("/cards/:card_id/move", post(board_handlers::move_card))
        .route("/cards/:card_id/tags", put(board_handlers::set_card_tags));

    let invite_routes = Router::new()
        .route("/redeem", post(invite_handlers::redeem_invite))
        .route("/decline", post(invite_handlers::decline_invite));

    let channel_routes = Router::new()
        .route(
            "/:id/messages",
            get(channel_handlers::history).post(channel_handlers::send_message),
        )
        .route("/:id/typing", post(channel_handlers::typing))
        .route("/:id/ws", get(channel_handlers::channel_ws));

    // Everything under /api/v1 needs a session
    let protected_routes = Router::new()
        .nest("/workspaces", workspace_routes)
        .nest("/workspaces/:id/board", board_routes)
        .nest("/invites", invite_routes)
        .nest("/channels", channel_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
