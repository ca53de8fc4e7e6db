mod controller;
mod utterance;

pub use controller::RecordingController;
pub use utterance::Utterance;
