//==================================================================================================
// Imports
//==================================================================================================
use ::anyhow::Result;

//==================================================================================================
// Structures
//==================================================================================================
pub struct Args {
    /// Total number of accesses to replay
    num_accesses: usize,
    /// L1 geometry ("sets:ways:linesize"); L1-I and L1-D share it
    l1: Option<String>,
    /// L2 geometry; requires --l1
    l2: Option<String>,
    /// L3 geometry; requires --l2
    l3: Option<String>,
    /// Physical filter window ("start:end", hex)
    region: Option<String>,
    /// Trace sink path ("-" for standard output)
    trace_file: String,
    /// Guest RAM bytes backing the workload
    ram_size: u64,
    /// Workload RNG seed
    seed: u64,
    /// Whether instruction fetches are logged without a cache hierarchy
    trace_code: bool,
}

//==================================================================================================
// Implementation
//==================================================================================================
impl Args {
    const OPT_HELP: &'static str = "--help";
    const OPT_ACCESSES: &'static str = "--accesses";
    const OPT_L1: &'static str = "--l1";
    const OPT_L2: &'static str = "--l2";
    const OPT_L3: &'static str = "--l3";
    const OPT_REGION: &'static str = "--region";
    const OPT_TRACE_FILE: &'static str = "--trace_file";
    const OPT_RAM_SIZE: &'static str = "--ram_size";
    const OPT_SEED: &'static str = "--seed";
    const OPT_NO_CODE: &'static str = "--no_code";

    pub fn parse(args: Vec<String>) -> Result<Self> {
        let mut num_accesses: usize = 10_000;
        let mut l1: Option<String> = None;
        let mut l2: Option<String> = None;
        let mut l3: Option<String> = None;
        let mut region: Option<String> = None;
        let mut trace_file: String = "-".to_string();
        let mut ram_size: u64 = 0x2000_0000;
        let mut seed: u64 = 1;
        let mut trace_code: bool = true;

        let mut i: usize = 1;
        while i < args.len() {
            match args[i].as_str() {
                Self::OPT_HELP => {
                    Self::usage(args[0].as_str());
                    return Err(anyhow::anyhow!("wrong usage"));
                }
                Self::OPT_ACCESSES => {
                    i += 1;
                    num_accesses = Self::value(&args, i, Self::OPT_ACCESSES)?
                        .parse::<usize>()
                        .map_err(|_| anyhow::anyhow!("invalid {} value", Self::OPT_ACCESSES))?;
                }
                Self::OPT_L1 => {
                    i += 1;
                    l1 = Some(Self::value(&args, i, Self::OPT_L1)?.to_string());
                }
                Self::OPT_L2 => {
                    i += 1;
                    l2 = Some(Self::value(&args, i, Self::OPT_L2)?.to_string());
                }
                Self::OPT_L3 => {
                    i += 1;
                    l3 = Some(Self::value(&args, i, Self::OPT_L3)?.to_string());
                }
                Self::OPT_REGION => {
                    i += 1;
                    region = Some(Self::value(&args, i, Self::OPT_REGION)?.to_string());
                }
                Self::OPT_TRACE_FILE => {
                    i += 1;
                    trace_file = Self::value(&args, i, Self::OPT_TRACE_FILE)?.to_string();
                }
                Self::OPT_RAM_SIZE => {
                    i += 1;
                    ram_size = Self::parse_u64(Self::value(&args, i, Self::OPT_RAM_SIZE)?)?;
                }
                Self::OPT_SEED => {
                    i += 1;
                    seed = Self::parse_u64(Self::value(&args, i, Self::OPT_SEED)?)?;
                }
                Self::OPT_NO_CODE => {
                    trace_code = false;
                }
                &_ => {
                    Self::usage(args[0].as_str());
                    return Err(anyhow::anyhow!("invalid argument {}", args[i]));
                }
            }

            i += 1;
        }

        Ok(Self {
            num_accesses,
            l1,
            l2,
            l3,
            region,
            trace_file,
            ram_size,
            seed,
            trace_code,
        })
    }

    fn value<'a>(args: &'a [String], index: usize, option: &str) -> Result<&'a str> {
        args.get(index)
            .map(|value| value.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing value for {}", option))
    }

    fn parse_u64(value: &str) -> Result<u64> {
        let parsed = if let Some(digits) = value.strip_prefix("0x") {
            u64::from_str_radix(digits, 16)
        } else {
            value.parse::<u64>()
        };
        parsed.map_err(|_| anyhow::anyhow!("invalid numeric value {}", value))
    }

    pub fn usage(program_name: &str) {
        println!(
            "Usage: {} [{} <n> {} <sets:ways:linesize> {} <sets:ways:linesize> {} <sets:ways:linesize> {} <start:end> {} <path> {} <bytes> {} <seed> {}]",
            program_name,
            Self::OPT_ACCESSES,
            Self::OPT_L1,
            Self::OPT_L2,
            Self::OPT_L3,
            Self::OPT_REGION,
            Self::OPT_TRACE_FILE,
            Self::OPT_RAM_SIZE,
            Self::OPT_SEED,
            Self::OPT_NO_CODE,
        );
    }

    pub fn number_of_accesses(&self) -> usize {
        self.num_accesses
    }

    pub fn l1(&self) -> Option<&str> {
        self.l1.as_deref()
    }

    pub fn l2(&self) -> Option<&str> {
        self.l2.as_deref()
    }

    pub fn l3(&self) -> Option<&str> {
        self.l3.as_deref()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn trace_file(&self) -> &str {
        &self.trace_file
    }

    pub fn ram_size(&self) -> u64 {
        self.ram_size
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn trace_code(&self) -> bool {
        self.trace_code
    }
}
