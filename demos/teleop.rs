// Keyboard teleop for the bridge: W/S drive, A/D turn, R/F gear, E enable,
// X disable, Q quit. Publishes a velocity command every cycle.
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tracing::info;
use zenoh::pubsub::Publisher;

use orbus_zenoh_bridge::config::{DEFAULT_PREFIX, TOPIC_CMD_ENABLE, TOPIC_CMD_VEL};
use orbus_zenoh_bridge::messages::{EnableCommand, VelocityCommand};

const GEARS: [(&str, f32, f32); 3] = [
    ("LOW", 0.05, 0.25), // m/s, rad/s
    ("MED", 0.15, 0.75),
    ("HIGH", 0.3, 1.5),
];
const CYCLE: Duration = Duration::from_millis(20);
const HOLD: Duration = Duration::from_millis(100); // Key repeat gap tolerated before stopping

type BoxError = Box<dyn std::error::Error + Send + Sync>;

enum Action {
    Drive,
    Enable(bool),
    Quit,
}

struct Teleop {
    gear: usize,
    command: VelocityCommand,
    last_drive: Instant,
}

impl Teleop {
    fn new() -> Self {
        Self {
            gear: 0,
            command: VelocityCommand::default(),
            last_drive: Instant::now(),
        }
    }

    fn on_key(&mut self, code: KeyCode) -> Action {
        let (_, linear, angular) = GEARS[self.gear];
        match code {
            KeyCode::Char('w') => self.command.linear = linear,
            KeyCode::Char('s') => self.command.linear = -linear,
            KeyCode::Char('a') => self.command.angular = angular,
            KeyCode::Char('d') => self.command.angular = -angular,
            KeyCode::Char('r') => return self.shift(self.gear.saturating_add(1).min(GEARS.len() - 1)),
            KeyCode::Char('f') => return self.shift(self.gear.saturating_sub(1)),
            KeyCode::Char('e') => return Action::Enable(true),
            KeyCode::Char('x') => return Action::Enable(false),
            KeyCode::Char('q') | KeyCode::Esc => return Action::Quit,
            _ => return Action::Drive,
        }
        self.last_drive = Instant::now();
        Action::Drive
    }

    fn shift(&mut self, gear: usize) -> Action {
        self.gear = gear;
        info!("Gear: {}", GEARS[gear].0);
        Action::Drive
    }

    /// Command to publish this cycle; stops once keys are released
    fn current(&mut self) -> VelocityCommand {
        if self.last_drive.elapsed() > HOLD {
            self.command = VelocityCommand::default();
        }
        self.command
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let session = zenoh::open(zenoh::Config::default()).await?;
    let cmd_vel = session
        .declare_publisher(format!("{DEFAULT_PREFIX}/{TOPIC_CMD_VEL}"))
        .await?;
    let cmd_enable = session
        .declare_publisher(format!("{DEFAULT_PREFIX}/{TOPIC_CMD_ENABLE}"))
        .await?;
    info!("W/S drive, A/D turn, R/F gear, E enable, X disable, Q quit");

    enable_raw_mode()?;
    let result = drive(&cmd_vel, &cmd_enable).await;
    disable_raw_mode()?;
    result
}

async fn drive(cmd_vel: &Publisher<'_>, cmd_enable: &Publisher<'_>) -> Result<(), BoxError> {
    let mut teleop = Teleop::new();

    loop {
        if event::poll(CYCLE)? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                if kind != KeyEventKind::Release {
                    match teleop.on_key(code) {
                        Action::Drive => {}
                        Action::Enable(enable) => {
                            let payload = serde_json::to_string(&EnableCommand { enable })?;
                            cmd_enable.put(payload).await?;
                            info!("Enable: {}", enable);
                        }
                        Action::Quit => return Ok(()),
                    }
                }
            }
        }

        // Publishing every cycle keeps the bridge's command source live
        cmd_vel.put(serde_json::to_string(&teleop.current())?).await?;
    }
}
