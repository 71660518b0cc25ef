use std::path::Path;
use std::sync::Arc;
use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use log::{info, warn};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use crate::config::io::load_config;
use crate::console::input::{parse_line, ConsoleCommand};
use crate::console::render::{describe_notice, describe_peripherals, describe_status, HELP};
use crate::device::btle::BtleTransport;
use crate::device::controller::{start_controller, ControllerHandle};
use crate::device::monitor::AdapterMonitor;
use crate::device::permission::PermissionGate;
use crate::device::transport::BleTransport;
use crate::device::types::{Intent, Notice, Retry, SessionState, Snapshot};
use crate::error::AppRunError;

/// What a line of input amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Intent(Intent),
    Print(String),
    Quit,
}

// remembers the latest retry offer, the "retry" command acts on it
#[derive(Debug, Default)]
pub struct Console {
    retry: Option<Retry>,
}

impl Console {
    pub fn new() -> Self {
        Console::default()
    }

    pub fn notice(&mut self, notice: &Notice) -> String {
        if let Some(retry) = notice.retry() {
            self.retry = Some(retry);
        }
        describe_notice(notice)
    }

    pub fn interpret(&mut self, command: ConsoleCommand, snapshot: &Snapshot) -> Action {
        match command {
            ConsoleCommand::Scan => Action::Intent(Intent::Scan),
            ConsoleCommand::List => Action::Print(describe_peripherals(&snapshot.peripherals)),
            ConsoleCommand::Connect(target) => match target.resolve(&snapshot.peripherals) {
                Some(peripheral_id) => Action::Intent(Intent::Connect { peripheral_id }),
                None => Action::Print("There is no device with that number, type \"list\" to see the devices.".to_string()),
            },
            ConsoleCommand::Drive(direction) => Action::Intent(Intent::Send(direction)),
            ConsoleCommand::Speed(step) => Action::Intent(Intent::AdjustSpeed(step)),
            ConsoleCommand::Disconnect => Action::Intent(Intent::Disconnect),
            ConsoleCommand::Retry => match self.retry.take() {
                Some(retry) => Action::Intent(retry.into()),
                None => Action::Print("Nothing to retry.".to_string()),
            },
            ConsoleCommand::Status => Action::Print(describe_status(snapshot)),
            ConsoleCommand::Help => Action::Print(HELP.to_string()),
            ConsoleCommand::Quit => Action::Quit,
        }
    }
}

async fn console_loop(controller: &ControllerHandle, mut notices: UnboundedReceiver<Notice>) -> Result<(), AppRunError> {
    let mut console = Console::new();
    let mut lines = BufReader::new(stdin()).lines();
    let mut snapshots = controller.subscribe();
    let mut last_state = snapshots.borrow_and_update().state.clone();

    println!("{}", HELP);

    'mainloop: loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => {
                        info!("End of input");
                        break 'mainloop;
                    },
                };

                let command = match parse_line(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue 'mainloop,
                    Err(err) => {
                        println!("{}", err);
                        continue 'mainloop;
                    },
                };

                match console.interpret(command, &controller.snapshot()) {
                    Action::Intent(intent) => controller.send(intent),
                    Action::Print(text) => println!("{}", text),
                    Action::Quit => break 'mainloop,
                }
            },
            notice = notices.next() => match notice {
                Some(notice) => println!("{}", console.notice(&notice)),
                None => break 'mainloop,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break 'mainloop;
                }

                let state = snapshots.borrow_and_update().state.clone();
                if state != last_state {
                    if state == SessionState::Idle && last_state == SessionState::Scanning {
                        println!("{}", describe_peripherals(&controller.snapshot().peripherals));
                    }
                    println!("{}", state);
                    last_state = state;
                }
            },
        }
    }

    Ok(())
}

pub async fn run_application(config_path: Option<&Path>) -> Result<(), AppRunError> {
    let config = load_config(config_path).await?;
    info!("Using {:?}", config);

    let transport = Arc::new(BtleTransport::new().await?);
    let monitor = AdapterMonitor::start(transport.clone()).await;

    // desktop platforms grant BLE access without a runtime prompt
    let permissions = Arc::new(PermissionGate::unrestricted());
    let (controller, notices) = start_controller(
        transport.clone(),
        permissions,
        monitor.subscribe(),
        config.controller_settings(),
        config.initial_speed(),
    );

    let result = console_loop(&controller, notices).await;

    controller.shutdown().await;
    monitor.shutdown().await;
    if let Err(err) = transport.shutdown().await {
        warn!("Failed to release the bluetooth adapter: {:?}", err);
    }
    info!("Bye");

    result
}
