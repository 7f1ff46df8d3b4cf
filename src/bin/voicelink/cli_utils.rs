use anyhow::Result;
use voicelink::audio::{CpalBackend, DeviceList};

/// Keyboard commands read from stdin, one per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    ToggleMute,
    Status,
    Quit,
    Help,
}

pub(crate) fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "m" | "mute" => Some(Command::ToggleMute),
        "s" | "status" => Some(Command::Status),
        "q" | "quit" | "exit" => Some(Command::Quit),
        "h" | "help" | "?" => Some(Command::Help),
        _ => None,
    }
}

/// Render a 0..=1 level as a fixed-width bar.
pub(crate) fn level_bar(level: f32, width: usize) -> String {
    let filled = (level.clamp(0.0, 1.0) * width as f32).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// `VOICELINK_TEST_DEVICES` is `inputs|outputs`, each a comma list.
fn test_devices(raw: &str) -> DeviceList {
    let (inputs, outputs) = raw.split_once('|').unwrap_or((raw, ""));
    DeviceList {
        inputs: parse_name_list(inputs),
        outputs: parse_name_list(outputs),
    }
}

fn print_names(kind: &str, names: &[String]) {
    if names.is_empty() {
        println!("No audio {kind} devices detected.");
    } else {
        println!("Available audio {kind} devices:");
        for name in names {
            println!("  - {name}");
        }
    }
}

pub(crate) fn list_devices() -> Result<()> {
    let devices = if let Ok(raw) = std::env::var("VOICELINK_TEST_DEVICES") {
        test_devices(&raw)
    } else {
        CpalBackend::list_devices().unwrap_or_else(|err| {
            eprintln!("Failed to list audio devices: {err}");
            DeviceList::default()
        })
    };
    print_names("input", &devices.inputs);
    print_names("output", &devices.outputs);
    Ok(())
}
