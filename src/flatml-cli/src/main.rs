// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use std::result::Result as StdResult;

use pico_args::Arguments;

use flatml_compat::engine::{
    compact, flatten, instantiate_imports, ConnectedRelevance, Report, Result, StandardReducer,
};
use flatml_compat::{open_cellml, to_cellml, FsLoader};

const VERSION: &str = "1.0";
const EXIT_FAILURE: i32 = 1;

#[macro_export]
macro_rules! die(
    ($($arg:tt)*) => { {
        use std;
        eprintln!($($arg)*);
        std::process::exit(EXIT_FAILURE)
    } }
);

fn usage() -> ! {
    let argv0 = std::env::args()
        .next()
        .unwrap_or_else(|| "<flatml>".to_string());
    die!(
        concat!(
            "flatml {}: Flatten and compact hierarchical cell models.\n\
         \n\
         USAGE:\n",
            "    {} [SUBCOMMAND] [OPTION...] PATH [OUTPUT]\n",
            "\n\
         OPTIONS:\n",
            "    -h, --help       show this message\n",
            "    --output FILE    path to write output file\n",
            "    --json-report    emit the pass report as JSON on stderr\n",
            "\n\
         SUBCOMMANDS:\n",
            "    model            Flatten a model's import closure into one document\n",
            "    variables        Flatten, then compact down to the variable surface\n",
        ),
        VERSION,
        argv0
    );
}

#[derive(Clone, Default, Debug)]
struct Args {
    path: Option<String>,
    output: Option<String>,
    is_compact: bool,
    is_json_report: bool,
}

fn parse_args() -> StdResult<Args, Box<dyn std::error::Error>> {
    let mut parsed = Arguments::from_env();
    if parsed.contains(["-h", "--help"]) {
        usage();
    }

    let subcommand = parsed.subcommand()?;
    if subcommand.is_none() {
        eprintln!("error: subcommand required");
        usage();
    }

    let mut args: Args = Default::default();

    let subcommand = subcommand.unwrap();
    if subcommand == "variables" {
        args.is_compact = true;
    } else if subcommand == "model" {
    } else {
        eprintln!("error: unknown subcommand {subcommand}");
        usage();
    }

    args.output = parsed.value_from_str("--output").ok();
    args.is_json_report = parsed.contains("--json-report");

    let free_arguments = parsed.finish();
    if free_arguments.is_empty() {
        eprintln!("error: input path required");
        usage();
    }
    args.path = free_arguments[0].to_str().map(str::to_owned);
    if args.output.is_none() && free_arguments.len() > 1 {
        args.output = free_arguments[1].to_str().map(str::to_owned);
    }

    Ok(args)
}

fn run(path: &str, is_compact: bool, report: &mut Report) -> Result<String> {
    let file = File::open(path).map_err(|err| {
        use flatml_compat::engine::{Error, ErrorCode, ErrorKind};
        Error::new(
            ErrorKind::Import,
            ErrorCode::DoesNotExist,
            Some(format!("{path}: {err}")),
        )
    })?;
    let mut reader = BufReader::new(file);
    let mut model = open_cellml(&mut reader)?;

    let loader = FsLoader::for_file(Path::new(path));
    instantiate_imports(&mut model, &loader)?;

    let reducer = StandardReducer;
    let flat = flatten(&model, &ConnectedRelevance, &reducer, report)?;
    let result = if is_compact {
        compact(&flat, &reducer, report)?
    } else {
        flat
    };

    to_cellml(&result)
}

fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {err}");
            usage();
        }
    };
    let path = args.path.unwrap_or_default();

    let mut report = Report::new();
    let output = match run(&path, args.is_compact, &mut report) {
        Ok(output) => output,
        Err(err) => {
            if !report.is_empty() {
                eprint!("{}", report.render());
            }
            die!("error: {}", err);
        }
    };

    match args.output {
        Some(ref out_path) => {
            let mut file = match File::create(out_path) {
                Ok(file) => file,
                Err(err) => die!("error: unable to create {}: {}", out_path, err),
            };
            if let Err(err) = file.write_all(output.as_bytes()) {
                die!("error: writing {}: {}", out_path, err);
            }
        }
        None => {
            println!("{output}");
        }
    }

    if args.is_json_report {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => eprintln!("{json}"),
            Err(err) => die!("error: serializing report: {}", err),
        }
    } else if !report.is_empty() {
        eprint!("{}", report.render());
    }
}
