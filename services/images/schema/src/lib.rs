//! sea-orm entities for the images service database.

pub mod images;
pub mod outbox_events;
