use clap::{Parser, ValueEnum};
use css_inliner::{Inliner, InlinerError, OutputMethod, StylesheetCache};
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
enum MethodArg {
    Html,
    Xml,
}

impl MethodArg {
    fn as_output_method(self) -> OutputMethod {
        match self {
            MethodArg::Html => OutputMethod::Html,
            MethodArg::Xml => OutputMethod::Xml,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "css-inliner",
    version,
    about = "Turn <style>/<link> rules into inline style attributes"
)]
struct Args {
    /// Input HTML file; stdin when omitted.
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    file: Option<PathBuf>,

    /// Output file; stdout when omitted.
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    output: Option<PathBuf>,

    /// Base URL for relative links, e.g. https://example.com/newsletter/
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Directory linked stylesheets are read from.
    #[arg(long, value_name = "DIR")]
    base_path: Option<PathBuf>,

    /// Rewrite `#anchor` links against the base URL as well.
    #[arg(long)]
    remove_internal_links: bool,

    /// Leave rules with pseudo-classes in a <style> block instead of grouping them inline.
    #[arg(long)]
    exclude_pseudoclasses: bool,

    /// Keep the original <style> elements.
    #[arg(long)]
    preserve_style_tags: bool,

    /// Ignore rules whose selector contains `*`.
    #[arg(long)]
    remove_star_selectors: bool,

    /// Drop class attributes once styles are inlined.
    #[arg(long)]
    remove_classes: bool,

    /// Drop `!important` from inlined declarations.
    #[arg(long)]
    strip_important: bool,

    /// Skip CSS validation; problems are otherwise logged as warnings.
    #[arg(long)]
    disable_validation: bool,

    /// Fail on the first CSS problem.
    #[arg(long, conflicts_with = "disable_validation")]
    strict_validation: bool,

    /// Parse and write the document as HTML or XML.
    #[arg(long, value_enum, default_value_t = MethodArg::Html)]
    method: MethodArg,

    /// Legacy attributes never to write, e.g. `bgcolor,width`.
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    disable_basic_attributes: Vec<String>,

    /// Extra stylesheet path or URL, applied after the document's own.
    #[arg(long = "external-style", value_name = "LOCATION")]
    external_styles: Vec<String>,

    /// Extra raw CSS, applied last.
    #[arg(long = "css-text", value_name = "CSS")]
    css_text: Vec<String>,

    /// Write a JSON-lines trace of the run.
    #[arg(long, value_name = "PATH")]
    debug_log: Option<PathBuf>,
}

fn build_inliner(args: &Args) -> Result<Inliner, InlinerError> {
    let mut builder = Inliner::builder()
        .preserve_internal_links(!args.remove_internal_links)
        .exclude_pseudoclasses(args.exclude_pseudoclasses)
        .keep_style_tags(args.preserve_style_tags)
        .include_star_selectors(!args.remove_star_selectors)
        .remove_classes(args.remove_classes)
        .strip_important(args.strip_important)
        .disable_validation(args.disable_validation)
        .strict_validation(args.strict_validation)
        .method(args.method.as_output_method())
        .disable_basic_attributes(args.disable_basic_attributes.iter().cloned())
        .cache(Arc::new(StylesheetCache::from_env()?));
    if let Some(url) = &args.base_url {
        builder = builder.base_url(url.clone());
    }
    if let Some(path) = &args.base_path {
        builder = builder.base_path(path.clone());
    }
    for location in &args.external_styles {
        builder = builder.external_style(location.clone());
    }
    for css in &args.css_text {
        builder = builder.css_text(css.clone());
    }
    if let Some(path) = &args.debug_log {
        builder = builder.debug_log(path.clone());
    }
    builder.build()
}

fn run(args: &Args, stdin: &mut dyn Read, stdout: &mut dyn Write) -> Result<(), InlinerError> {
    let inliner = build_inliner(args)?;
    let html = match &args.file {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            stdin.read_to_string(&mut buf)?;
            buf
        }
    };
    let out = inliner.transform(&html)?;
    match &args.output {
        Some(path) => fs::write(path, out)?,
        None => {
            stdout.write_all(out.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let stdin = io::stdin();
    let stdout = io::stdout();
    if let Err(err) = run(&args, &mut stdin.lock(), &mut stdout.lock()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
