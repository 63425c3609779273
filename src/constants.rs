pub const NUM_SLOTS: usize = 256;
pub const DEFAULT_TICK: std::time::Duration = std::time::Duration::from_millis(1);
pub const DRIVER_THREAD_NAME: &str = "ratecounter-wheel";
