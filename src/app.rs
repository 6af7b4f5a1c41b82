use crate::gateway::Gateway;
use crate::handlers;
use crate::models::{Event, Member, Period};
use crate::state::AppState;
use crate::storage::KeyValueStore;
use axum::{
    routing::{get, post, put},
    Router,
};

pub fn router<G: Gateway, S: KeyValueStore>(state: AppState<G, S>) -> Router {
    Router::new()
        .route("/api/status", get(handlers::status::<G, S>))
        .route("/api/sync", post(handlers::sync::<G, S>))
        .route("/api/data", get(handlers::data::<G, S>))
        .route("/api/selection", get(handlers::selection::<G, S>))
        .route("/api/selected-member", put(handlers::select_member::<G, S>))
        .route("/api/attendance", post(handlers::update_attendance::<G, S>))
        .route("/api/members/active", get(handlers::active_members::<G, S>))
        .route("/api/periods", post(handlers::add_period::<G, S>))
        .route(
            "/api/periods/:id",
            put(handlers::update_record::<G, S, Period>)
                .delete(handlers::delete_record::<G, S, Period>),
        )
        .route("/api/periods/:id/events", get(handlers::period_events::<G, S>))
        .route("/api/periods/:id/rates", get(handlers::period_rates::<G, S>))
        .route("/api/members", post(handlers::add_member::<G, S>))
        .route(
            "/api/members/:id",
            put(handlers::update_record::<G, S, Member>)
                .delete(handlers::delete_record::<G, S, Member>),
        )
        .route("/api/events", post(handlers::add_event::<G, S>))
        .route(
            "/api/events/:id",
            put(handlers::update_record::<G, S, Event>)
                .delete(handlers::delete_record::<G, S, Event>),
        )
        .route("/api/events/:id/tally", get(handlers::event_tally::<G, S>))
        .route("/api/album/events", get(handlers::album_events::<G, S>))
        .route(
            "/api/album/events/:name/photos",
            get(handlers::photos::<G, S>).post(handlers::upload_photos::<G, S>),
        )
        .route(
            "/api/album/photos/:photo/comments",
            get(handlers::comments::<G, S>).post(handlers::add_comment::<G, S>),
        )
        .route(
            "/api/album/photos/:photo/reactions",
            get(handlers::reactions::<G, S>),
        )
        .route(
            "/api/album/comments/:id",
            put(handlers::edit_comment::<G, S>).delete(handlers::delete_comment::<G, S>),
        )
        .route(
            "/api/album/comments/:id/reactions",
            post(handlers::toggle_reaction::<G, S>),
        )
        .with_state(state)
}
