use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use memwalk_core::error::WalkError;
use memwalk_core::layout::TypeRegistry;
use memwalk_core::memory::{MemoryAccessor, SparseMemory};
use memwalk_core::types::Address;
use memwalk_core::walk::QueueKind;
use memwalk_core::{Target, WalkConfig};
use memwalk_utils::{debug, info, init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard};

mod loader;
mod report;

use loader::LoadError;
use report::{resolve_root, ReportError, Reporter, TokenList};

/// Walk intrusive kernel data structures in core files and live processes.
#[derive(Parser, Debug)]
#[command(name = "memwalk")]
#[command(version)]
#[command(about = "Walk intrusive kernel data structures in core files and live processes", long_about = None)]
struct Cli
{
    /// Core file (ELF or Mach-O) to read memory from
    #[arg(long, conflicts_with = "pid")]
    core: Option<PathBuf>,

    /// Raw memory dump mapped at an address, as <address>=<file> (repeatable)
    #[arg(long = "dump", value_name = "ADDR=FILE", conflicts_with = "pid")]
    dumps: Vec<String>,

    /// Live Linux process to read memory from
    #[arg(long)]
    pid: Option<u32>,

    /// JSON file with type layouts and symbols
    #[arg(long)]
    layout: PathBuf,

    /// Nodes a single traversal may visit before it is reported as malformed (0 = unlimited)
    #[arg(long)]
    max_nodes: Option<usize>,

    /// Compare walked entry counts against the counts stored in the target
    #[arg(long, value_name = "BOOL")]
    verify_counts: Option<bool>,

    /// Log level (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

/// Where a generic walk starts and what it walks over
#[derive(Args, Debug)]
struct WalkArgs
{
    /// Head symbol name, or head address when --head-type is given
    root: String,
    /// Type of the head structure
    #[arg(long)]
    head_type: Option<String>,
    /// Element type
    #[arg(long)]
    elem_type: String,
    /// Member of the element that embeds the link
    #[arg(long)]
    link: String,
    /// Element members to print next to each address
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Walk a LIST (or SLIST with --singly) from its head
    List
    {
        #[command(flatten)]
        walk: WalkArgs,
        /// Singly linked (SLIST_HEAD)
        #[arg(long, default_value_t = false)]
        singly: bool,
    },
    /// Walk a TAILQ (or STAILQ with --singly) from its head
    Tailq
    {
        #[command(flatten)]
        walk: WalkArgs,
        /// Singly linked (STAILQ_HEAD)
        #[arg(long, default_value_t = false)]
        singly: bool,
    },
    /// Walk a red-black tree in order
    Rbtree
    {
        #[command(flatten)]
        walk: WalkArgs,
        /// Address leaves point at instead of null
        #[arg(long, value_parser = parse_address)]
        sentinel: Option<Address>,
    },
    /// Show the nodes of a cuckoo hash table
    Cuckoo
    {
        /// Address of the struct cuckoo_hashtable
        #[arg(value_parser = parse_address)]
        table: Address,
    },
    /// Show the global list of skmem caches
    Caches,
    /// Show slabs and bufctls of a skmem cache
    Slab
    {
        /// Address of the struct skmem_cache
        #[arg(value_parser = parse_address)]
        cache: Address,
        /// Also list bufctls found on both free and allocated lists
        #[arg(long, default_value_t = false)]
        check_overlap: bool,
    },
    /// Show the global list of skmem arenas
    Arenas,
    /// Show the global list of skmem regions
    Regions,
    /// Show segments of a skmem region
    Region
    {
        /// Address of the struct skmem_region
        #[arg(value_parser = parse_address)]
        region: Address,
    },
    /// Show the RX, TX, alloc and free rings of a channel
    ChannelRings
    {
        /// Address of the struct kern_channel
        #[arg(value_parser = parse_address)]
        channel: Address,
    },
    /// Show the user packet pool hash of a channel
    UppHash
    {
        /// Address of the struct kern_channel
        #[arg(value_parser = parse_address)]
        channel: Address,
    },
    /// Show the channels opened on a nexus
    NexusChannels
    {
        /// Address of the struct kern_nexus
        #[arg(value_parser = parse_address)]
        nexus: Address,
    },
    /// Show netns port reservations (unbound ones by default)
    NetnsTokens
    {
        /// Every token instead of the unbound ones
        #[arg(long, default_value_t = false, conflicts_with = "ifp")]
        all: bool,
        /// Tokens bound to this struct ifnet
        #[arg(long, value_parser = parse_address)]
        ifp: Option<Address>,
    },
    /// Show the protocol namespace reservation tree
    Protons,
}

#[derive(Debug, thiserror::Error)]
enum CliError
{
    #[error("Failed to initialize logging: {0}")]
    Logging(#[from] LoggingError),

    #[error("no memory source: pass --core, --dump or --pid")]
    NoSource,

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Walk(#[from] WalkError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

fn parse_address(text: &str) -> Result<Address, String>
{
    Address::parse(text).map_err(|err| err.to_string())
}

fn init(cli: &Cli) -> Result<LoggingGuard, CliError>
{
    let guard = match cli.log_level {
        Some(level) => {
            let format = match std::env::var(memwalk_utils::logging::LOG_FORMAT_ENV) {
                Ok(value) => value.parse()?,
                Err(_) => LogFormat::default(),
            };
            init_logging_with_level(level, format)?
        }
        None => init_logging()?,
    };
    Ok(guard)
}

fn walk_config(cli: &Cli) -> WalkConfig
{
    let mut config = WalkConfig::from_env();
    if let Some(max_nodes) = cli.max_nodes {
        config = config.with_max_nodes(max_nodes);
    }
    if let Some(verify) = cli.verify_counts {
        config = config.with_verify_counts(verify);
    }
    config
}

fn open_memory(cli: &Cli) -> Result<Box<dyn MemoryAccessor>, CliError>
{
    if let Some(pid) = cli.pid {
        return open_process(pid);
    }
    if cli.core.is_none() && cli.dumps.is_empty() {
        return Err(CliError::NoSource);
    }

    let mut image = match &cli.core {
        Some(path) => loader::load_core(path)?,
        None => SparseMemory::new(),
    };
    for dump in &cli.dumps {
        let (address, path) = loader::parse_dump_arg(dump)?;
        loader::load_dump(&mut image, address, &path)?;
    }
    Ok(Box::new(image))
}

#[cfg(target_os = "linux")]
fn open_process(pid: u32) -> Result<Box<dyn MemoryAccessor>, CliError>
{
    use memwalk_core::memory::{CachedMemory, ProcessMemory};

    info!(pid, "reading live process memory");
    Ok(Box::new(CachedMemory::new(ProcessMemory::open(pid)?)))
}

#[cfg(not(target_os = "linux"))]
fn open_process(_pid: u32) -> Result<Box<dyn MemoryAccessor>, CliError>
{
    Err(WalkError::InvalidArgument("--pid is only supported on Linux".to_string()).into())
}

fn run(cli: &Cli) -> Result<(), CliError>
{
    let memory = open_memory(cli)?;
    let types: TypeRegistry = loader::load_layout(&cli.layout)?;
    let config = walk_config(cli);
    debug!(?config, "walk configuration");

    let target = Target::new(&*memory, &types).with_config(config);
    let stdout = io::stdout();
    let mut reporter = Reporter::new(target, stdout.lock());

    let result = run_command(&mut reporter, &target, &cli.command);
    // Whatever was produced before a failure is kept.
    reporter.into_inner().flush().map_err(ReportError::from)?;
    result
}

fn run_command<'a, W: Write>(reporter: &mut Reporter<'a, W>, target: &Target<'a>, command: &Commands) -> Result<(), CliError>
{
    match command {
        Commands::List { walk, singly } => {
            let kind = if *singly { QueueKind::Slist } else { QueueKind::List };
            let head = resolve_root(target, &walk.root, walk.head_type.as_deref())?;
            reporter.queue(kind, &head, &walk.elem_type, &walk.link, &walk.fields)?;
        }
        Commands::Tailq { walk, singly } => {
            let kind = if *singly { QueueKind::Stailq } else { QueueKind::Tailq };
            let head = resolve_root(target, &walk.root, walk.head_type.as_deref())?;
            reporter.queue(kind, &head, &walk.elem_type, &walk.link, &walk.fields)?;
        }
        Commands::Rbtree { walk, sentinel } => {
            let head = resolve_root(target, &walk.root, walk.head_type.as_deref())?;
            reporter.rbtree(&head, &walk.elem_type, &walk.link, *sentinel, &walk.fields)?;
        }
        Commands::Cuckoo { table } => reporter.cuckoo(*table)?,
        Commands::Caches => reporter.caches()?,
        Commands::Slab { cache, check_overlap } => reporter.slab(*cache, *check_overlap)?,
        Commands::Arenas => reporter.arenas()?,
        Commands::Regions => reporter.regions()?,
        Commands::Region { region } => reporter.region(*region)?,
        Commands::ChannelRings { channel } => reporter.channel_rings(*channel)?,
        Commands::UppHash { channel } => reporter.upp_hash(*channel)?,
        Commands::NexusChannels { nexus } => reporter.nexus_channels(*nexus)?,
        Commands::NetnsTokens { all, ifp } => {
            let list = match (*all, *ifp) {
                (true, _) => TokenList::All,
                (false, Some(ifp)) => TokenList::Interface(ifp),
                (false, None) => TokenList::Unbound,
            };
            reporter.netns_tokens(list)?;
        }
        Commands::Protons => reporter.protons()?,
    }
    Ok(())
}

fn main()
{
    let cli = Cli::parse();

    let _guard = match init(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
