pub mod conduit;
pub mod config;
pub mod goals;
pub mod logging;
pub mod mediawiki;
pub mod pages;
pub mod programs;
pub mod project;
pub mod publish;
pub mod run;
pub mod template;
pub mod tsv;
