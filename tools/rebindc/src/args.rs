// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use clap::builder::ValueHint;
use clap_derive::{Parser, ValueEnum};
use eyre::eyre;
use figment::Figment;
use figment::providers::{Format as ProviderFormat, Json, Serialized, Yaml};
use rebind_compiler::{PipelineOptions, RewriteOptions, SlotLayout};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Emit {
    /// The lowered instruction sequence, in the host's JSON array form.
    Iseq,
    /// A disassembly listing of the lowered instruction sequence.
    Disasm,
    /// The (rewritten) tree, as source text.
    Source,
    /// The (rewritten) tree's debug dump.
    Tree,
}

#[derive(Parser, Debug, Serialize, Deserialize)]
pub struct Args {
    #[arg(
        value_name = "input",
        help = "Instruction sequence to compile, as the JSON dump of its array form. `-` reads standard input.",
        value_hint = ValueHint::FilePath
    )]
    pub input: PathBuf,

    #[arg(
        short,
        long,
        value_name = "output",
        help = "Where to write the result. Standard output if not given.",
        value_hint = ValueHint::FilePath
    )]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "iseq", help = "What to produce")]
    pub emit: Emit,

    #[arg(
        long,
        help = "Wrap block code objects in a top-level one that evaluates to a proc, so the host can load them directly"
    )]
    pub wrap: bool,

    #[arg(long, help = "Pretty-print JSON output")]
    pub pretty: bool,

    #[arg(
        long,
        value_name = "config",
        help = "Path to configuration (YAML or JSON) file to use, if any. If not specified, defaults are used.\
                Configuration file values can be overridden by command line arguments.",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub rewrite_args: RewriteArgs,

    #[arg(
        long,
        value_name = "slot-base-offset",
        help = "Number of environment slots the host reserves below each local table"
    )]
    pub slot_base_offset: Option<u32>,

    #[arg(long, help = "Enable debug logging")]
    pub debug: bool,
}

#[derive(Parser, Debug, Serialize, Deserialize)]
pub struct RewriteArgs {
    #[arg(long, help = "Lower the lifted tree without desugaring bind statements")]
    pub no_rewrite: bool,

    #[arg(
        long,
        value_name = "operator",
        help = "Method marking a bind statement (default: <=)"
    )]
    pub bind_operator: Option<String>,

    #[arg(
        long,
        value_name = "method",
        help = "Continuation method used while more binds follow (default: and_then)"
    )]
    pub chain_method: Option<String>,

    #[arg(
        long,
        value_name = "method",
        help = "Continuation method used for the last bind of a chain (default: within)"
    )]
    pub terminal_method: Option<String>,
}

impl RewriteArgs {
    pub fn merge_config(&self, config: &mut RewriteOptions) {
        if let Some(operator) = &self.bind_operator {
            config.bind_operator = operator.clone();
        }
        if let Some(method) = &self.chain_method {
            config.chain_method = method.clone();
        }
        if let Some(method) = &self.terminal_method {
            config.terminal_method = method.clone();
        }
    }
}

impl Args {
    fn merge_config(&self, mut config: PipelineOptions) -> PipelineOptions {
        self.rewrite_args.merge_config(&mut config.rewrite);
        if self.rewrite_args.no_rewrite {
            config.rewrite_enabled = false;
        }
        if let Some(base_offset) = self.slot_base_offset {
            // Lifting and lowering have to agree on the layout.
            let slots = SlotLayout { base_offset };
            config.lift.slots = slots;
            config.codegen.slots = slots;
        }
        config
    }

    /// Load the configuration file if we have it, and then merge the arguments into it.
    pub fn load_config(&self) -> Result<PipelineOptions, eyre::Report> {
        let config = match &self.config_file {
            Some(config_path) => {
                let f = Figment::new().merge(Serialized::defaults(PipelineOptions::default()));
                let f = match config_path.extension().and_then(|e| e.to_str()) {
                    Some("json") => f.merge(Json::file(config_path)),
                    _ => f.merge(Yaml::file(config_path)),
                };
                f.extract::<PipelineOptions>().map_err(|e| {
                    eyre!(
                        "Failed to parse configuration from {:?}: {}",
                        config_path,
                        e
                    )
                })?
            }
            None => PipelineOptions::default(),
        };
        Ok(self.merge_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::{Args, Emit};
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use rebind_compiler::PipelineOptions;
    use std::io::Write;

    #[test]
    fn defaults_without_config() {
        let args = Args::try_parse_from(["rebindc", "in.json"]).unwrap();
        assert_eq!(args.emit, Emit::Iseq);
        assert_eq!(args.load_config().unwrap(), PipelineOptions::default());
    }

    #[test]
    fn command_line_overrides_config_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "rewrite:\n  chain_method: flat_map\n  terminal_method: map\ncodegen:\n  root_label: \"<main>\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let args = Args::try_parse_from([
            "rebindc",
            "in.json",
            "--config-file",
            &path,
            "--terminal-method",
            "collect",
            "--slot-base-offset",
            "2",
            "--emit",
            "source",
        ])
        .unwrap();
        let config = args.load_config().unwrap();
        assert_eq!(config.rewrite.bind_operator, "<=");
        assert_eq!(config.rewrite.chain_method, "flat_map");
        assert_eq!(config.rewrite.terminal_method, "collect");
        assert_eq!(config.codegen.root_label, "<main>");
        assert_eq!(config.lift.slots.base_offset, 2);
        assert_eq!(config.codegen.slots.base_offset, 2);
        assert!(config.rewrite_enabled);
        assert_eq!(args.emit, Emit::Source);
    }

    #[test]
    fn json_config_and_no_rewrite() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"rewrite": {{"bind_operator": "<<"}}}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let args =
            Args::try_parse_from(["rebindc", "in.json", "--config-file", &path, "--no-rewrite"])
                .unwrap();
        let config = args.load_config().unwrap();
        assert_eq!(config.rewrite.bind_operator, "<<");
        assert!(!config.rewrite_enabled);
    }

    #[test]
    fn unreadable_config_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "rewrite: [not, a, map]").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let args = Args::try_parse_from(["rebindc", "in.json", "--config-file", &path]).unwrap();
        assert!(args.load_config().is_err());
    }
}
