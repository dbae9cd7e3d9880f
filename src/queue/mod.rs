mod fork_join;

pub use fork_join::ForkJoinQueue;
pub use fork_join::ForkJoinQueueConfig;
