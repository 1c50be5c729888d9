//! Pack a directory source into a single archive
//!
//! Usage: asset_packer [-i <ignore regex>]... <assets dir> <output file>

use std::path::PathBuf;
use std::process::ExitCode;

const USAGE: &str = "Usage: asset_packer [-i <ignore regex>]... <assets dir> <output file>";

struct Args {
    ignore: Vec<String>,
    input: PathBuf,
    output: PathBuf,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut ignore = Vec::new();
    let mut paths = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-i" | "--ignore" => ignore.push(args.next().ok_or("-i needs a pattern")?),
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ => paths.push(PathBuf::from(arg)),
        }
    }
    match <[PathBuf; 2]>::try_from(paths) {
        Ok([input, output]) => Ok(Args { ignore, input, output }),
        Err(_) => Err(USAGE.to_string()),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    if !args.input.is_dir() {
        log::error!("{} is not a directory", args.input.display());
        return ExitCode::FAILURE;
    }

    match star_asset::pack_directory(&args.input, &args.output, &args.ignore) {
        Ok(count) => {
            println!("Packed {} files into {}", count, args.output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Packing failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, String> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["-i", "\\.tmp$", "assets", "out.pak", "--ignore", "^/test/"]).unwrap();
        assert_eq!(parsed.ignore, vec!["\\.tmp$", "^/test/"]);
        assert_eq!(parsed.input, PathBuf::from("assets"));
        assert_eq!(parsed.output, PathBuf::from("out.pak"));

        assert!(args(&["assets"]).is_err());
        assert!(args(&["a", "b", "c"]).is_err());
        assert!(args(&["a", "b", "-i"]).is_err());
    }
}
