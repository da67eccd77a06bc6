pub mod postgres;

pub use postgres::PgIncidentStore;
