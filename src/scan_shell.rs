use crate::error::TransferError;
use crate::scan_controller::ScanController;
use serde_json::{Value, json};

/// Line commands accepted by the scan shell. One command per scan event or
/// user action; the GUI-free counterpart of the operator panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Help,
    Status,
    Records,
    NewPlate { plate_barcode: String, user: String },
    Scan { barcode: String },
    Skip,
    Undo,
    UndoScan,
    Discard { well: String },
    LoadTemplate { path: String },
    LoadSamples { path: String },
    Reset,
    Quit,
}

#[derive(Debug, Clone)]
pub struct ShellRunResult {
    pub output: Value,
    pub quit: bool,
}

pub fn help_text() -> String {
    [
        "new <plate-barcode> <user>   start a plate",
        "scan <barcode>               process one tube scan",
        "skip                         mark the current well empty",
        "undo                         unwind the previous scan",
        "undo-scan                    cancel the in-flight scan",
        "discard <well>               discard a specific well",
        "template <path>              load a well template csv",
        "samples <path>               load a sample allow-list csv",
        "status                       show plate progress",
        "records                      show the record export",
        "reset                        abandon the plate",
        "help                         this text",
        "quit                         leave the shell",
    ]
    .join("\n")
}

impl ShellCommand {
    /// Parses one input line; empty lines parse to None.
    pub fn parse(line: &str) -> Result<Option<ShellCommand>, String> {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = parts.collect();
        let arity = |n: usize| -> Result<(), String> {
            if rest.len() == n {
                Ok(())
            } else {
                Err(format!("'{command}' expects {n} argument(s), got {}", rest.len()))
            }
        };
        let cmd = match command {
            "help" => {
                arity(0)?;
                ShellCommand::Help
            }
            "status" => {
                arity(0)?;
                ShellCommand::Status
            }
            "records" => {
                arity(0)?;
                ShellCommand::Records
            }
            "new" => {
                arity(2)?;
                ShellCommand::NewPlate {
                    plate_barcode: rest[0].to_string(),
                    user: rest[1].to_string(),
                }
            }
            "scan" => {
                arity(1)?;
                ShellCommand::Scan {
                    barcode: rest[0].to_string(),
                }
            }
            "skip" => {
                arity(0)?;
                ShellCommand::Skip
            }
            "undo" => {
                arity(0)?;
                ShellCommand::Undo
            }
            "undo-scan" => {
                arity(0)?;
                ShellCommand::UndoScan
            }
            "discard" => {
                arity(1)?;
                ShellCommand::Discard {
                    well: rest[0].to_string(),
                }
            }
            "template" => {
                arity(1)?;
                ShellCommand::LoadTemplate {
                    path: rest[0].to_string(),
                }
            }
            "samples" => {
                arity(1)?;
                ShellCommand::LoadSamples {
                    path: rest[0].to_string(),
                }
            }
            "reset" => {
                arity(0)?;
                ShellCommand::Reset
            }
            "quit" | "exit" => {
                arity(0)?;
                ShellCommand::Quit
            }
            other => return Err(format!("unknown command '{other}', try 'help'")),
        };
        Ok(Some(cmd))
    }

    pub fn preview(&self) -> String {
        match self {
            Self::Help => "show shell command help".to_string(),
            Self::Status => "show plate progress".to_string(),
            Self::Records => "show the current record export".to_string(),
            Self::NewPlate { plate_barcode, user } => {
                format!("start plate '{plate_barcode}' for user '{user}'")
            }
            Self::Scan { barcode } => format!("process scan '{barcode}'"),
            Self::Skip => "skip the current well".to_string(),
            Self::Undo => "unwind the previous scan".to_string(),
            Self::UndoScan => "cancel the in-flight scan".to_string(),
            Self::Discard { well } => format!("discard well '{well}'"),
            Self::LoadTemplate { path } => format!("load well template from '{path}'"),
            Self::LoadSamples { path } => format!("load sample list from '{path}'"),
            Self::Reset => "abandon the plate and start over".to_string(),
            Self::Quit => "leave the shell".to_string(),
        }
    }

    pub fn run(&self, ttw: &mut ScanController) -> ShellRunResult {
        let output = match self {
            Self::Help => json!({ "help": help_text() }),
            Self::Status => status_json(ttw),
            Self::Records => match serde_json::to_value(ttw.export()) {
                Ok(value) => value,
                Err(e) => json!({ "error": e.to_string() }),
            },
            Self::NewPlate { plate_barcode, user } => {
                fold(ttw.set_metadata(plate_barcode, user), ttw)
            }
            Self::Scan { barcode } => fold(ttw.next(barcode), ttw),
            Self::Skip => fold(ttw.skip(), ttw),
            Self::Undo => fold(ttw.undo(), ttw),
            Self::UndoScan => fold(ttw.undo_current_scan(), ttw),
            Self::Discard { well } => fold(ttw.discard_well(well), ttw),
            Self::LoadTemplate { path } => {
                fold(ttw.load_well_template_csv(std::path::Path::new(path)), ttw)
            }
            Self::LoadSamples { path } => {
                fold(ttw.load_sample_list_csv(std::path::Path::new(path)), ttw)
            }
            Self::Reset => {
                ttw.reset();
                status_json(ttw)
            }
            Self::Quit => json!({ "bye": true }),
        };
        ShellRunResult {
            output,
            quit: *self == Self::Quit,
        }
    }
}

fn fold(result: Result<(), TransferError>, ttw: &ScanController) -> Value {
    match result {
        Ok(()) => status_json(ttw),
        Err(e) if e.is_confirm() => json!({ "confirm": e.message }),
        Err(e) => json!({
            "error": format!("{:?}", e.code),
            "message": e.message,
            "lightup_well": e.lightup_well,
        }),
    }
}

fn status_json(ttw: &ScanController) -> Value {
    let seq = ttw.sequence();
    let buckets = seq.buckets();
    json!({
        "plate_barcode": ttw.plate_barcode(),
        "user": ttw.user(),
        "cursor": seq.cursor(),
        "total": seq.len(),
        "next_well": seq.current_transfer().map(|tf| tf.dest_well.clone()),
        "completed": buckets.completed(),
        "started": buckets.started(),
        "discarded": buckets.discarded(),
        "lightup_well": seq.lightup_well(),
        "plate_complete": seq.plate_complete(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlateConfig;
    use crate::record_writer::NullRecordSink;
    use crate::well::{PlateSize, Well, well_list};

    #[test]
    fn test_parse() {
        assert_eq!(ShellCommand::parse("").unwrap(), None);
        assert_eq!(ShellCommand::parse("  ").unwrap(), None);
        assert_eq!(
            ShellCommand::parse("scan T0001").unwrap(),
            Some(ShellCommand::Scan {
                barcode: "T0001".to_string()
            })
        );
        assert_eq!(
            ShellCommand::parse("new PLATE01 jdoe").unwrap(),
            Some(ShellCommand::NewPlate {
                plate_barcode: "PLATE01".to_string(),
                user: "jdoe".to_string()
            })
        );
        assert_eq!(ShellCommand::parse("skip").unwrap(), Some(ShellCommand::Skip));
        assert!(ShellCommand::parse("scan").is_err());
        assert!(ShellCommand::parse("sideways").is_err());
    }

    #[test]
    fn test_run_scan_and_status() {
        let controls: Vec<Well> = well_list(PlateSize::Wells96)
            .into_iter()
            .filter(|well| well.as_str() != "A1" && well.as_str() != "B1")
            .collect();
        let config = PlateConfig {
            controls,
            ..PlateConfig::default()
        };
        let mut ttw = ScanController::new(config, Box::new(NullRecordSink)).unwrap();
        ttw.set_metadata("PLATE01", "jdoe").unwrap();

        let result = ShellCommand::Scan {
            barcode: "T0001".to_string(),
        }
        .run(&mut ttw);
        assert!(!result.quit);
        assert_eq!(result.output["cursor"], 1);
        assert_eq!(result.output["started"][0], "A1");

        let result = ShellCommand::Scan {
            barcode: "T0001".to_string(),
        }
        .run(&mut ttw);
        assert_eq!(result.output["error"], "DuplicateBarcode");
        assert_eq!(result.output["lightup_well"], "A1");

        let result = ShellCommand::Quit.run(&mut ttw);
        assert!(result.quit);
    }
}
