// Timeouts, key expressions, parameter keys and defaults
use std::time::Duration;

use crate::transport::SendPolicy;

// Every send to the board: 3 attempts, 200 ms each
pub const SEND_POLICY: SendPolicy = SendPolicy {
    retries: 3,
    timeout: Duration::from_millis(200),
};

// Heartbeat defaults (overridden by timer/rate and timer/alive)
pub const DEFAULT_TIMER_RATE_HZ: f64 = 1.0;
pub const DEFAULT_WATCHDOG_SECS: f64 = 1.0;

// A velocity source counts as live this long after its last sample
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_millis(500);

// Only this board type can be driven by the motion bridge
pub const MOTION_BOARD_TYPE: &str = "Motor Control";

// Zenoh key expressions, relative to the --prefix (default "orbus")
pub const DEFAULT_PREFIX: &str = "orbus";
pub const LINK_TX: &str = "link/tx"; // batches to the link daemon (query)
pub const LINK_RX: &str = "link/rx"; // unsolicited board packets
pub const LINK_ERROR: &str = "link/error"; // board/link error reports
pub const SERVICE_ROOT: &str = "srv";

// Inbound command topics
pub const TOPIC_CMD_VEL: &str = "cmd_vel";
pub const TOPIC_CMD_ENABLE: &str = "cmd_enable";
pub const TOPIC_CMD_POSE: &str = "cmd_pose";
pub const TOPIC_CMD_ODOM: &str = "cmd_odom";

// Parameter keys shared by several modules
pub const KEY_TIMER_RATE: &str = "timer/rate";
pub const KEY_TIMER_ALIVE: &str = "timer/alive";
pub const KEY_TYPE_BOARD: &str = "info/type_board";
pub const KEY_PROCESS_LENGTH: &str = "process/length";
pub const KEY_TIME_STEP: &str = "time/step";
pub const KEY_TIME_TM_MILL: &str = "time/tm_mill";
pub const KEY_TIME_K: &str = "time/k_time";
pub const KEY_ODO_STEP: &str = "odo_mis_step";

// Coordinate frame names
pub const DEFAULT_FRAME_ODOM: &str = "odom";
pub const DEFAULT_FRAME_BASE_LINK: &str = "base_link";
pub const DEFAULT_FRAME_JOINT: &str = "joint";

// Name accepted by the update services to mean every target
pub const ALL_TARGETS: &str = "all";
