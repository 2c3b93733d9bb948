// Library for tests to access modules

pub mod agent;
pub mod aggregator;
pub mod collector;
pub mod config;
pub mod dispatch;
pub mod docker_repo;
pub mod hub;
pub mod models;
pub mod routes;
pub mod sampler;
pub mod version;
