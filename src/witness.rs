//! In-process execution of circom witness generators.
//!
//! circom compiles each circuit into a WASM module that computes the full
//! witness from named input signals. The module talks to its host through a
//! shared read/write buffer of `n32` 32-bit limbs and reports failures through
//! `runtime.exceptionHandler(code)`. The host turns that call into a typed
//! [`CircuitExit`] so callers can tell a failed `assert` (the inputs do not
//! satisfy the circuit) apart from every other failure.

use num_bigint::{BigInt, BigUint};
use thiserror::Error;
use tracing::debug;
use wasmer::{
    imports, Function, Imports, Instance, Module, RuntimeError, Store, TypedFunction,
    WasmTypeList,
};

use crate::utils::{fnv1a_64, from_u32_limbs, normalize, to_u32_limbs};

/// Exit codes raised by circom's generated witness code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CircuitExit {
    #[error("signal not found")]
    SignalNotFound,
    #[error("too many signals set")]
    TooManySignals,
    #[error("signal already set")]
    SignalAlreadySet,
    #[error("assert failed")]
    AssertFailed,
    #[error("not enough memory")]
    OutOfMemory,
    #[error("input signal array access exceeds the size")]
    InputOutOfBounds,
    #[error("unknown exit code {0}")]
    Unknown(i32),
}

impl CircuitExit {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => CircuitExit::SignalNotFound,
            2 => CircuitExit::TooManySignals,
            3 => CircuitExit::SignalAlreadySet,
            4 => CircuitExit::AssertFailed,
            5 => CircuitExit::OutOfMemory,
            6 => CircuitExit::InputOutOfBounds,
            other => CircuitExit::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            CircuitExit::SignalNotFound => 1,
            CircuitExit::TooManySignals => 2,
            CircuitExit::SignalAlreadySet => 3,
            CircuitExit::AssertFailed => 4,
            CircuitExit::OutOfMemory => 5,
            CircuitExit::InputOutOfBounds => 6,
            CircuitExit::Unknown(code) => *code,
        }
    }

    /// The witness generator rejected the inputs because a constraint check failed.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, CircuitExit::AssertFailed)
    }
}

#[derive(Debug, Error)]
pub enum WitnessError {
    #[error("invalid witness program: {0}")]
    Compile(#[from] wasmer::CompileError),
    #[error("failed to instantiate witness program: {0}")]
    Instantiate(#[from] Box<wasmer::InstantiationError>),
    #[error("witness program does not export `{name}`: {source}")]
    Export {
        name: &'static str,
        #[source]
        source: wasmer::ExportError,
    },
    #[error("circuit exited: {0}")]
    Exit(CircuitExit),
    #[error("witness program trapped: {0}")]
    Trap(RuntimeError),
    #[error("no input signal named `{0}`")]
    UnknownSignal(String),
    #[error("input signal `{signal}` takes {expected} values, got {actual}")]
    SignalLength {
        signal: String,
        expected: usize,
        actual: usize,
    },
    #[error("only {set} of {expected} input values were set")]
    MissingInputs { set: u32, expected: u32 },
    #[error("witness program reports an unusable field size of {0} limbs")]
    FieldSize(i32),
}

impl From<RuntimeError> for WitnessError {
    fn from(err: RuntimeError) -> Self {
        match err.downcast::<CircuitExit>() {
            Ok(exit) => WitnessError::Exit(exit),
            Err(err) => WitnessError::Trap(err),
        }
    }
}

/// A loaded witness program, ready to compute witnesses.
pub struct WitnessCalculator {
    store: Store,
    instance: Instance,
    version: u32,
    n32: usize,
    prime: BigUint,
    witness_size: u32,
}

impl WitnessCalculator {
    pub fn from_bytes(program: &[u8]) -> Result<Self, WitnessError> {
        let mut store = Store::default();
        let module = Module::new(&store, program)?;
        let import_object = runtime_imports(&mut store);
        let instance =
            Instance::new(&mut store, &module, &import_object).map_err(Box::new)?;

        let mut calculator = Self {
            store,
            instance,
            version: 0,
            n32: 0,
            prime: BigUint::default(),
            witness_size: 0,
        };

        calculator.version = calculator
            .export::<(), i32>("getVersion")?
            .call(&mut calculator.store)? as u32;

        let n32 = calculator
            .export::<(), i32>("getFieldNumLen32")?
            .call(&mut calculator.store)?;
        if n32 <= 0 {
            return Err(WitnessError::FieldSize(n32));
        }
        calculator.n32 = n32 as usize;

        calculator
            .export::<(), ()>("getRawPrime")?
            .call(&mut calculator.store)?;
        calculator.prime = calculator.read_shared()?;

        calculator.witness_size = calculator
            .export::<(), i32>("getWitnessSize")?
            .call(&mut calculator.store)? as u32;

        debug!(
            version = calculator.version,
            n32 = calculator.n32,
            witness_size = calculator.witness_size,
            "Loaded witness program"
        );
        Ok(calculator)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// The field modulus the circuit was compiled for.
    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    pub fn witness_size(&self) -> u32 {
        self.witness_size
    }

    /// Compute the full witness. Index 0 is the constant signal `1`; public
    /// outputs and inputs follow in circuit order.
    pub fn calculate(
        &mut self,
        inputs: &[(String, Vec<BigInt>)],
        sanity_check: bool,
    ) -> Result<Vec<BigUint>, WitnessError> {
        self.export::<i32, ()>("init")?
            .call(&mut self.store, i32::from(sanity_check))?;

        let signal_size = self.export::<(i32, i32), i32>("getInputSignalSize")?;
        let set_signal = self.export::<(i32, i32, i32), ()>("setInputSignal")?;

        let mut values_set = 0u32;
        for (signal, values) in inputs {
            let hash = fnv1a_64(signal);
            let msb = (hash >> 32) as u32 as i32;
            let lsb = hash as u32 as i32;

            // Compiled programs answer 0 for names that are not inputs.
            let expected = signal_size.call(&mut self.store, msb, lsb)?;
            if expected <= 0 {
                return Err(WitnessError::UnknownSignal(signal.clone()));
            }
            if values.len() != expected as usize {
                return Err(WitnessError::SignalLength {
                    signal: signal.clone(),
                    expected: expected as usize,
                    actual: values.len(),
                });
            }

            for (index, value) in values.iter().enumerate() {
                let element = normalize(value, &self.prime);
                self.write_shared(&element)?;
                set_signal.call(&mut self.store, msb, lsb, index as i32)?;
                values_set += 1;
            }
        }

        // Older generators do not export the input count.
        if let Ok(input_size) = self.export::<(), i32>("getInputSize") {
            let expected = input_size.call(&mut self.store)? as u32;
            if values_set < expected {
                return Err(WitnessError::MissingInputs {
                    set: values_set,
                    expected,
                });
            }
        }

        let get_witness = self.export::<i32, ()>("getWitness")?;
        let mut witness = Vec::with_capacity(self.witness_size as usize);
        for index in 0..self.witness_size {
            get_witness.call(&mut self.store, index as i32)?;
            witness.push(self.read_shared()?);
        }
        Ok(witness)
    }

    fn export<Args, Rets>(&self, name: &'static str) -> Result<TypedFunction<Args, Rets>, WitnessError>
    where
        Args: WasmTypeList,
        Rets: WasmTypeList,
    {
        self.instance
            .exports
            .get_typed_function(&self.store, name)
            .map_err(|source| WitnessError::Export { name, source })
    }

    fn read_shared(&mut self) -> Result<BigUint, WitnessError> {
        let read = self.export::<i32, i32>("readSharedRWMemory")?;
        let mut limbs = Vec::with_capacity(self.n32);
        for index in 0..self.n32 {
            limbs.push(read.call(&mut self.store, index as i32)? as u32);
        }
        Ok(from_u32_limbs(&limbs))
    }

    fn write_shared(&mut self, value: &BigUint) -> Result<(), WitnessError> {
        let write = self.export::<(i32, i32), ()>("writeSharedRWMemory")?;
        for (index, limb) in to_u32_limbs(value, self.n32).into_iter().enumerate() {
            write.call(&mut self.store, index as i32, limb as i32)?;
        }
        Ok(())
    }
}

fn runtime_imports(store: &mut Store) -> Imports {
    imports! {
        "runtime" => {
            "exceptionHandler" => Function::new_typed(store, exception_handler),
            "printErrorMessage" => Function::new_typed(store, ignore_message),
            "writeBufferMessage" => Function::new_typed(store, ignore_message),
            "showSharedRWMemory" => Function::new_typed(store, ignore_message),
        }
    }
}

/// Raising the exit as the host error aborts the call and lets the caller
/// downcast the resulting trap back into a [`CircuitExit`].
fn exception_handler(code: i32) -> Result<(), CircuitExit> {
    Err(CircuitExit::from_code(code))
}

fn ignore_message() {}
