pub mod doc;
pub mod events;
pub mod graphql;
pub mod handlers;
pub mod routes;
pub mod state;
