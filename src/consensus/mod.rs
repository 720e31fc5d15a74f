//! Consensus: the miniblock DAG, difficulty retargeting, and the block
//! verification pipeline.

pub mod dag;
pub mod difficulty;
pub mod verify;
