/// Slots in the heartbeat queue between the ticker and the publisher.
pub const HEARTBEAT_QUEUE_CAPACITY: usize = 1;

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Stop the registration and remove its records on SIGINT or SIGTERM.
    pub deregister_on_interrupt: bool,
    /// Exit the process once that teardown finished. Only meaningful with
    /// `deregister_on_interrupt`, which takes over the signals' default action.
    pub exit_on_interrupt: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            deregister_on_interrupt: true,
            exit_on_interrupt: true,
        }
    }
}
