/// Optimization level the method is being compiled at
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum OptLevel {
    NoOpt,
    Cold,
    Warm,
    Hot,
    VeryHot,
    Scorching,
}

/// How transitions out of compiled code into the interpreter are triggered
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum OsrMode {
    /// Compiled code decides to transition (eg. after an inlining guard fails)
    Voluntary,

    /// The VM may force a transition at any induction point (eg. a debugger attaching)
    Involuntary,
}

/// What the target processor can do in a single instruction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetCapabilities {
    /// Floating point arithmetic is available at all
    pub has_fpu: bool,

    /// `imax`/`imin`
    pub int_max_min: bool,

    /// `lmax`/`lmin`
    pub long_max_min: bool,

    /// Population count
    pub popcount: bool,

    /// Count of leading zero bits
    pub leading_zeros: bool,

    /// Byte order reversal of an `int`
    pub byte_swap: bool,

    /// Square root of a `double`
    pub sqrt: bool,
}

impl TargetCapabilities {
    /// Target supporting everything
    pub fn new() -> TargetCapabilities {
        TargetCapabilities {
            has_fpu: true,
            int_max_min: true,
            long_max_min: true,
            popcount: true,
            leading_zeros: true,
            byte_swap: true,
            sqrt: true,
        }
    }

    /// Target where every intrinsic falls back to a call
    pub fn minimal() -> TargetCapabilities {
        TargetCapabilities {
            has_fpu: true,
            int_max_min: false,
            long_max_min: false,
            popcount: false,
            leading_zeros: false,
            byte_swap: false,
            sqrt: false,
        }
    }
}

impl Default for TargetCapabilities {
    fn default() -> Self {
        TargetCapabilities::new()
    }
}

/// Layout of objects in the heap
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectModel {
    /// Bytes between the start of an array object and its first element
    pub array_header_size: i32,

    /// Large arrays are split into leaves hanging off a spine, so element accesses may need a
    /// spine check on top of the bound check
    pub hybrid_arraylets: bool,
}

impl ObjectModel {
    pub fn new() -> ObjectModel {
        ObjectModel {
            array_header_size: 16,
            hybrid_arraylets: false,
        }
    }
}

impl Default for ObjectModel {
    fn default() -> Self {
        ObjectModel::new()
    }
}

/// Everything that affects what IL gets generated for a method
#[derive(Clone, Debug)]
pub struct TranslatorConfig {
    pub opt_level: OptLevel,

    /// Every call is an OSR induction point: the operand stack is saved to pending push slots
    /// before the call
    pub enable_osr: bool,

    pub osr_mode: OsrMode,

    /// Debugging is possible at full speed (implies involuntary OSR and forbids method handle
    /// invocations)
    pub full_speed_debug: bool,

    /// Code is compiled ahead of time and relocated when loaded, so no VM state may be assumed
    pub relocatable: bool,

    /// Replace loads of `static final` fields of initialized classes by their current value
    pub fold_static_finals: bool,

    /// Use field facts from class lookahead (non-null, array lengths, exact types)
    pub use_class_lookahead: bool,

    /// Skip the receiver type test on `invokespecial`s inside interfaces
    pub skip_invoke_special_interface_type_checks: bool,

    /// Refuse to compile lambda form methods below `OptLevel::Scorching`
    pub lambda_forms_must_be_scorching: bool,

    /// Number of pending push slots saved at one OSR point above which a trace message is logged
    ///
    /// This has no effect on the generated IL.
    pub osr_pending_push_threshold: Option<usize>,

    /// Poll for asynchronous events on backward branches
    pub insert_async_checks: bool,

    pub target: TargetCapabilities,

    pub object_model: ObjectModel,
}

impl TranslatorConfig {
    pub fn new() -> TranslatorConfig {
        TranslatorConfig {
            opt_level: OptLevel::Warm,
            enable_osr: false,
            osr_mode: OsrMode::Voluntary,
            full_speed_debug: false,
            relocatable: false,
            fold_static_finals: true,
            use_class_lookahead: true,
            skip_invoke_special_interface_type_checks: false,
            lambda_forms_must_be_scorching: true,
            osr_pending_push_threshold: None,
            insert_async_checks: true,
            target: TargetCapabilities::new(),
            object_model: ObjectModel::new(),
        }
    }

    /// Is the VM allowed to force a transition to the interpreter after any call?
    pub fn involuntary_osr(&self) -> bool {
        self.enable_osr && (self.full_speed_debug || self.osr_mode == OsrMode::Involuntary)
    }
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        TranslatorConfig::new()
    }
}
