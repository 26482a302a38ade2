pub mod console;
pub mod credentials;
pub mod events;
pub mod folders;
pub mod matching;
pub mod names;
pub mod references;
pub mod runs;
pub mod settings;
