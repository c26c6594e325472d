pub mod db;

pub use db::PgRepository;
