use jbc2il::frontend::{JavaVm, UnknownByteCodeAction};
use jbc2il::ilgen::{self, MethodDetails, OsrMode, TranslatorConfig};
use jbc2il::jvm::{
    BinaryName, ClassAccessFlags, ClassData, ClassGraph, ClassGraphArenas, Code, Method,
    MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor, UnqualifiedName,
};

use clap::{crate_version, value_parser, Arg, ArgAction, ArgMatches, Command};
use std::process;

#[derive(Debug)]
enum CliError {
    BadArgument(String),
    Translation(ilgen::Error),
}

impl From<ilgen::Error> for CliError {
    fn from(err: ilgen::Error) -> CliError {
        CliError::Translation(err)
    }
}

fn main() {
    env_logger::init();

    let matches = Command::new("JVM bytecode to IL translator")
        .version(crate_version!())
        .about("Translate the bytecode of one method into tree IL and print it")
        .arg(
            Arg::new("descriptor")
                .long("descriptor")
                .value_name("DESCRIPTOR")
                .default_value("()V")
                .help("Method descriptor (eg. `(IJ)Ljava/lang/Object;`)"),
        )
        .arg(
            Arg::new("class")
                .long("class")
                .value_name("CLASS_NAME")
                .default_value("Test")
                .help("Class declaring the method (eg. `foo/bar/Baz`)"),
        )
        .arg(
            Arg::new("static")
                .long("static")
                .action(ArgAction::SetTrue)
                .help("The method is static"),
        )
        .arg(
            Arg::new("synchronized")
                .long("synchronized")
                .action(ArgAction::SetTrue)
                .help("The method is synchronized"),
        )
        .arg(
            Arg::new("max-locals")
                .long("max-locals")
                .value_name("SLOTS")
                .value_parser(value_parser!(u16))
                .help("Local variable slots (defaults to what the parameters need)"),
        )
        .arg(
            Arg::new("max-stack")
                .long("max-stack")
                .value_name("SLOTS")
                .value_parser(value_parser!(u16))
                .default_value("16"),
        )
        .arg(
            Arg::new("osr")
                .long("osr")
                .action(ArgAction::SetTrue)
                .help("Enable on-stack replacement"),
        )
        .arg(
            Arg::new("involuntary-osr")
                .long("involuntary-osr")
                .action(ArgAction::SetTrue)
                .help("Let the VM force transitions to the interpreter after any call"),
        )
        .arg(
            Arg::new("fsd")
                .long("full-speed-debug")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("relocatable")
                .long("relocatable")
                .action(ArgAction::SetTrue)
                .help("Generate IL for ahead-of-time compiled (relocatable) code"),
        )
        .arg(
            Arg::new("hybrid-arraylets")
                .long("hybrid-arraylets")
                .action(ArgAction::SetTrue)
                .help("Arrays may be split into arraylets"),
        )
        .arg(
            Arg::new("dlt")
                .long("dlt")
                .value_name("BC_INDEX")
                .value_parser(value_parser!(usize))
                .help("Enter the method from the interpreter at this loop header"),
        )
        .arg(
            Arg::new("ignore-unknown")
                .long("ignore-unknown")
                .action(ArgAction::SetTrue)
                .help("Skip unknown instructions instead of failing"),
        )
        .arg(
            Arg::new("BYTECODE")
                .help("Bytecode of the method, in hex (whitespace is ignored)")
                .required(true)
                .index(1),
        )
        .get_matches();

    if let Err(err) = run(&matches) {
        log::error!("Translation failed: {:?}", err);
        eprintln!("error: {:?}", err);
        process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> Result<(), CliError> {
    let bytes = parse_hex(string_arg(matches, "BYTECODE")?)?;
    let descriptor = MethodDescriptor::parse(string_arg(matches, "descriptor")?)
        .map_err(|err| CliError::BadArgument(format!("descriptor: {}", err)))?;
    let class = BinaryName::from_string(string_arg(matches, "class")?.to_owned())
        .map_err(CliError::BadArgument)?;
    let name =
        UnqualifiedName::from_string("method".to_owned()).map_err(CliError::BadArgument)?;

    let is_static = matches.get_flag("static");
    let mut access_flags = MethodAccessFlags::PUBLIC;
    if is_static {
        access_flags |= MethodAccessFlags::STATIC;
    }
    if matches.get_flag("synchronized") {
        access_flags |= MethodAccessFlags::SYNCHRONIZED;
    }
    let max_locals = match matches.get_one::<u16>("max-locals") {
        Some(max_locals) => *max_locals,
        None => descriptor.parameter_length(!is_static) as u16,
    };
    let max_stack = matches.get_one::<u16>("max-stack").copied().unwrap_or(16);

    let method = Method {
        class: class.clone(),
        class_is_interface: false,
        name,
        descriptor,
        access_flags,
        code: Code {
            max_stack,
            max_locals,
            bytes,
            exception_table: vec![],
        },
    };

    let mut config = TranslatorConfig::new();
    config.enable_osr = matches.get_flag("osr") || matches.get_flag("involuntary-osr");
    if matches.get_flag("involuntary-osr") {
        config.osr_mode = OsrMode::Involuntary;
    }
    config.full_speed_debug = matches.get_flag("fsd");
    config.relocatable = matches.get_flag("relocatable");
    config.object_model.hybrid_arraylets = matches.get_flag("hybrid-arraylets");

    let details = match matches.get_one::<usize>("dlt") {
        Some(bc_index) => MethodDetails::DltInProgress {
            bc_index: *bc_index,
        },
        None => MethodDetails::Ordinary,
    };

    let arenas = ClassGraphArenas::new();
    let graph = ClassGraph::new(&arenas);
    let object = graph.add_class(ClassData::new(
        BinaryName::OBJECT,
        None,
        ClassAccessFlags::PUBLIC,
    ));
    object.initialized.set(true);
    if class != BinaryName::OBJECT {
        let data = graph.add_class(ClassData::new(class, Some(object), ClassAccessFlags::PUBLIC));
        data.initialized.set(true);
    }

    let mut vm = JavaVm::new(&graph);
    if matches.get_flag("ignore-unknown") {
        vm.set_unknown_byte_code_action(UnknownByteCodeAction::Ignore);
    }

    log::info!(
        "Translating {} bytes of bytecode for {:?}",
        method.code.bytes.len(),
        method.class
    );
    let il = ilgen::generate_il(&method, &details, &vm, &config)?;
    print!("{}", il);
    Ok(())
}

fn string_arg<'m>(matches: &'m ArgMatches, id: &str) -> Result<&'m str, CliError> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .ok_or_else(|| CliError::BadArgument(format!("missing {}", id)))
}

/// Decode hex digits into bytes, ignoring whitespace
fn parse_hex(hex: &str) -> Result<Vec<u8>, CliError> {
    let digits: Vec<char> = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::BadArgument(
            "bytecode has an odd number of hex digits".to_owned(),
        ));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair: String = pair.iter().collect();
            u8::from_str_radix(&pair, 16)
                .map_err(|_| CliError::BadArgument(format!("bad hex byte '{}'", pair)))
        })
        .collect()
}
