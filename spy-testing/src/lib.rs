pub mod scenarios;
pub mod stub_store;

pub use scenarios::{init_test_logging, LeadershipFeed, Observed, RecordingObserver};
pub use stub_store::{StubScript, StubStore, StubTranscript};
