mod commands;

use airgap_core::{install_signal_handler, CancelToken};
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::{exit_code_for, expand_tilde, Layers, LoadArgs};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "airgap",
    version,
    about = "Build, verify, and distribute packages for air-gapped environments"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    /// Talk to OCI registries over plain HTTP.
    #[arg(long, default_value_t = false, global = true)]
    plain_http: bool,

    #[command(subcommand)]
    command: Commands,
}

/// How a package is read and verified.
#[derive(Debug, Args)]
struct LoadFlags {
    /// Public key to verify the package signature with.
    #[arg(long)]
    key: Option<PathBuf>,
    /// Do not check the package signature.
    #[arg(long, default_value_t = false)]
    insecure_skip_signature: bool,
    /// Only load these components (comma separated).
    #[arg(long, value_delimiter = ',')]
    components: Vec<String>,
    /// Tolerate missing component tarballs.
    #[arg(long, default_value_t = false)]
    partial: bool,
}

impl LoadFlags {
    fn into_args(self) -> LoadArgs {
        LoadArgs {
            key: self.key,
            skip_signature_validation: self.insecure_skip_signature,
            components: self.components,
            partial: self.partial,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a package archive from a definition directory.
    Create {
        /// Directory containing zarf.yaml.
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Directory the archive is written to.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Target architecture (defaults to the host).
        #[arg(short, long)]
        arch: Option<String>,
        /// Flavor selecting flavor-specific components.
        #[arg(short, long, default_value = "")]
        flavor: String,
        /// Split the archive into chunks of this many MB (0 disables splitting).
        #[arg(short, long, default_value_t = 0)]
        max_package_size: u64,
        /// Private key to sign the package with.
        #[arg(long)]
        signing_key: Option<PathBuf>,
        /// Cache for skeleton packages imported by URL.
        #[arg(long, default_value = "~/.cache/airgap")]
        cache_dir: String,
        /// Pull images for one registry from another (host=mirror, repeatable).
        #[arg(long = "registry-override")]
        registry_overrides: Vec<String>,
    },
    /// Show the metadata and components of a package.
    Inspect {
        /// Package directory, archive, .part000 header, HTTP URL, or oci:// reference.
        source: String,
        #[command(flatten)]
        load: LoadFlags,
        /// List every file in the package.
        #[arg(long, default_value_t = false)]
        list_files: bool,
        /// Extract the package SBOMs into this directory.
        #[arg(long)]
        sbom_out: Option<PathBuf>,
    },
    /// Push a package, or a definition directory as a skeleton, to a registry.
    Publish {
        /// Package source, or a definition directory to publish as a skeleton.
        source: String,
        /// Destination as oci://<registry>/<namespace>.
        destination: String,
        #[command(flatten)]
        load: LoadFlags,
        /// Cache for skeleton packages imported by URL.
        #[arg(long, default_value = "~/.cache/airgap")]
        cache_dir: String,
        /// Concurrent blob uploads.
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Pull a package from a registry into an archive.
    Pull {
        /// oci://<registry>/<repository>:<tag> reference.
        reference: String,
        /// Directory the archive is written to.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Architecture to pick from the tag index (defaults to the host).
        #[arg(short, long)]
        arch: Option<String>,
        /// Which layers to retrieve.
        #[arg(long, value_enum, default_value_t = Layers::All)]
        layers: Layers,
        #[command(flatten)]
        load: LoadFlags,
    },
    /// Split a file into numbered parts with a .part000 header.
    Split {
        /// File to split; it is replaced by its parts.
        file: PathBuf,
        /// Maximum part size in MB.
        #[arg(short, long)]
        chunk_size: u64,
    },
    /// Reassemble and verify a split file.
    Assemble {
        /// The .part000 header of the split file.
        source: PathBuf,
        /// Output path (defaults to the original file name).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generate an ed25519 signing key pair.
    Keygen {
        /// Directory the key files are written to.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// Stem of the key files (<name>.key and <name>.pub).
        #[arg(long, default_value = "airgap")]
        name: String,
        /// Overwrite existing key files.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("AIRGAP_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelToken::new();
    install_signal_handler(&cancel);

    let json = cli.json;
    let plain_http = cli.plain_http;

    let result = match cli.command {
        Commands::Create {
            dir,
            output,
            arch,
            flavor,
            max_package_size,
            signing_key,
            cache_dir,
            registry_overrides,
        } => commands::create::run(
            &commands::create::CreateArgs {
                definition_dir: dir,
                output_dir: output,
                architecture: arch,
                flavor,
                max_package_size_mb: max_package_size,
                signing_key,
                cache_dir: expand_tilde(&cache_dir),
                registry_overrides,
                plain_http,
            },
            &cancel,
            json,
        ),
        Commands::Inspect {
            source,
            load,
            list_files,
            sbom_out,
        } => commands::inspect::run(
            &source,
            &load.into_args(),
            plain_http,
            list_files,
            sbom_out.as_deref(),
            json,
        ),
        Commands::Publish {
            source,
            destination,
            load,
            cache_dir,
            concurrency,
        } => commands::publish::run(
            &source,
            &destination,
            &load.into_args(),
            plain_http,
            expand_tilde(&cache_dir),
            concurrency,
            json,
        ),
        Commands::Pull {
            reference,
            output,
            arch,
            layers,
            load,
        } => commands::pull::run(
            &reference,
            &output,
            arch.as_deref(),
            layers,
            &load.into_args(),
            plain_http,
            json,
        ),
        Commands::Split { file, chunk_size } => commands::split::run(&file, chunk_size, json),
        Commands::Assemble { source, output } => {
            commands::assemble::run(&source, output.as_deref(), json)
        }
        Commands::Keygen { dir, name, force } => commands::keygen::run(&dir, &name, force, json),
        Commands::Completions { shell } => commands::generate::completions::<Cli>(shell),
        Commands::ManPages { dir } => commands::generate::man_pages::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
