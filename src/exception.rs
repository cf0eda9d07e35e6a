/// trap frame and write-fault delivery
pub mod traps;
