pub mod followup;
pub mod replay_worker;
