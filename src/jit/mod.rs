//! Compiles microcode runs into [`Procedure`]s, and caches them.

use std::sync::{Arc};
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, trace};

use crate::code::{InstructionSource};
use crate::config::{Config};
use crate::cpu::{Mode};
use crate::error::{CompileError, Result};
use crate::graph::{Graph, Run};

mod block;
pub use block::{CodeBlock, Interrupt};

mod procedure;
pub use procedure::{Code, Slot, Procedure, LIMIT, verify};

mod codegen;
pub use codegen::{Body, generate};

mod handler;
pub use handler::{HandlerEntry};

mod cache;
pub use cache::{ProcedureCache, Statistics};

/// Compiles microcode runs in any [`Mode`], publishing the results in a
/// shared [`ProcedureCache`].
#[derive(Debug)]
pub struct Compiler {
    cache: Arc<ProcedureCache>,
    max_instructions: AtomicUsize,
}

impl Compiler {
    pub fn new(config: &Config, cache: Arc<ProcedureCache>) -> Self {
        Compiler {cache, max_instructions: AtomicUsize::new(config.max_instructions)}
    }

    pub fn cache(&self) -> &Arc<ProcedureCache> { &self.cache }

    /// The largest number of x86 instructions future compilations will
    /// cover.
    pub fn max_instructions(&self) -> usize {
        self.max_instructions.load(Ordering::Relaxed)
    }

    /// Changes [`max_instructions()`](Self::max_instructions). Procedures that
    /// are already cached remain valid.
    pub fn set_max_instructions(&self, max_instructions: usize) {
        self.max_instructions.store(max_instructions, Ordering::Relaxed);
    }

    /// Returns a [`Procedure`] for the instructions of `source`, in `mode`.
    /// If an identical run has been compiled before in the same mode, returns
    /// the cached procedure. Otherwise, compiles one, named `name` if given,
    /// and publishes it.
    pub fn compile(
        &self,
        mode: Mode,
        name: Option<&str>,
        source: &mut dyn InstructionSource,
    ) -> Result<Arc<Procedure>> {
        let run = Run::build(source, self.max_instructions())?;
        if let Some(procedure) = self.cache.lookup(mode, &run) {
            return Ok(procedure);
        }
        let graph = Graph::build(mode, &run)?;
        let body = generate(&graph)?;
        let procedure = Procedure::new(name.unwrap_or_default().to_owned(), mode, &run, body)?;
        let procedure = match name {
            Some(_) => self.cache.publish(Arc::new(procedure)),
            None => self.cache.publish_generated(procedure),
        };
        trace!(name = procedure.name(), instructions = run.x86_count(), "compiled");
        Ok(procedure)
    }

    pub fn compile_real(&self, name: Option<&str>, source: &mut dyn InstructionSource) -> Result<Arc<Procedure>> {
        self.compile(Mode::Real, name, source)
    }

    pub fn compile_protected(&self, name: Option<&str>, source: &mut dyn InstructionSource) -> Result<Arc<Procedure>> {
        self.compile(Mode::Protected, name, source)
    }

    pub fn compile_virtual8086(&self, name: Option<&str>, source: &mut dyn InstructionSource) -> Result<Arc<Procedure>> {
        self.compile(Mode::Virtual8086, name, source)
    }

    /// Like [`compile()`](Self::compile), but returns `None` on failure. The
    /// caller should then interpret the instructions instead.
    pub fn get(&self, mode: Mode, source: &mut dyn InstructionSource) -> Option<Arc<Procedure>> {
        match self.compile(mode, None, source) {
            Ok(procedure) => Some(procedure),
            Err(e @ CompileError::Rejected(_)) => {
                info!(?mode, error = %e, "procedure rejected");
                None
            },
            Err(e) => {
                debug!(?mode, error = %e, "cannot compile");
                None
            },
        }
    }

    pub fn get_real(&self, source: &mut dyn InstructionSource) -> Option<Arc<Procedure>> {
        self.get(Mode::Real, source)
    }

    pub fn get_protected(&self, source: &mut dyn InstructionSource) -> Option<Arc<Procedure>> {
        self.get(Mode::Protected, source)
    }

    pub fn get_virtual8086(&self, source: &mut dyn InstructionSource) -> Option<Arc<Procedure>> {
        self.get(Mode::Virtual8086, source)
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
pub mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_pcg::{Pcg64};

    use crate::code::{ArraySource, Element, Microcode as M, REGISTERS};
    use crate::cpu::{Processor, Vector};
    use crate::mock::{MockCpu, interpret, outcome};

    fn w(m: M) -> u32 { m as u32 }

    fn compiler() -> Compiler {
        Compiler::new(&Config::default(), Arc::new(ProcedureCache::new()))
    }

    /// Picks a random register-move microcode of the given kind.
    fn reg(rng: &mut Pcg64, base: M, avoid_esp: bool) -> u32 {
        loop {
            let r = rng.gen_range(0..8);
            if !(avoid_esp && REGISTERS[r] == Element::Esp) { return w(base) + r as u32; }
        }
    }

    /// Generates a random instruction, as `(x86_length, words)`.
    fn random_instruction(rng: &mut Pcg64, mode: Mode) -> (u32, Vec<u32>) {
        let mut words = match rng.gen_range(0..14) {
            0 => vec![reg(rng, M::Load0Eax, false), reg(rng, M::Store0Eax, true)],
            1 => vec![w(M::Load0Id), rng.gen(), reg(rng, M::Store0Eax, true)],
            2 => vec![reg(rng, M::Load0Eax, false), reg(rng, M::Load1Eax, false), w(M::Add), reg(rng, M::Store0Eax, true), w(M::AddFlags)],
            3 => vec![reg(rng, M::Load0Eax, false), reg(rng, M::Load1Eax, false), w(M::Sub), reg(rng, M::Store0Eax, true), w(M::SubFlags)],
            4 => vec![reg(rng, M::Load0Eax, false), w(M::Load1Id), rng.gen(), w(M::Xor), reg(rng, M::Store0Eax, true), w(M::LogicFlags)],
            5 => vec![reg(rng, M::Load0Eax, false), w(M::Inc), reg(rng, M::Store0Eax, true), w(M::IncFlags)],
            6 => {
                // Mostly in range, sometimes not.
                let address = if rng.gen_bool(0.9) { rng.gen_range(0..0x100) } else { 0xFFFF_FF00 };
                vec![reg(rng, M::Load0Eax, false), w(M::MemReset), w(M::AddrId), address, w(M::LoadSegDs), w(M::Store0MemDword)]
            },
            7 => {
                let address = if rng.gen_bool(0.9) { rng.gen_range(0..0x100) } else { 0xFFFF_FF00 };
                vec![w(M::MemReset), w(M::AddrId), address, w(M::LoadSegDs), w(M::Load0MemWord), reg(rng, M::Store0Eax, true)]
            },
            8 => vec![reg(rng, M::Load0Eax, false), w(M::PushO32)],
            9 => vec![w(M::PopO32), reg(rng, M::Store0Eax, true)],
            10 => vec![w(M::Load0Eax), reg(rng, M::Load1Eax, false), w(M::Div), w(M::Store0Eax)],
            11 => vec![w(M::Load0Id), rng.gen_range(0..0x100), reg(rng, M::Load1Eax, false), w(M::OutByte)],
            12 => vec![[w(M::Clc), w(M::Stc), w(M::Cmc), w(M::Cld), w(M::Std), w(M::Cli), w(M::Sti)][rng.gen_range(0..7)]],
            _ => {
                let jump = if rng.gen() { M::JumpZero } else { M::JumpNotZero };
                return (2, vec![w(jump), rng.gen_range(0..0x40)]);
            },
        };
        if mode == Mode::Protected && rng.gen_bool(0.1) {
            words = vec![reg(rng, M::Load0Eax, false), w(M::Store0Ds)];
        }
        if rng.gen_bool(0.7) { words.push(w(M::EipUpdate)); }
        (rng.gen_range(1..7), words)
    }

    fn random_cpu(rng: &mut Pcg64) -> MockCpu {
        let mut cpu = MockCpu::new();
        for &r in &REGISTERS { cpu.set(r, rng.gen_range(0..4)); }
        cpu.set(Element::Esp, 0x8000);
        cpu.set(Element::Eip, rng.gen_range(0..0x1_0000));
        cpu.set(Element::ZeroFlag, rng.gen_range(0..2));
        cpu.set(Element::Iopl, rng.gen_range(0..4));
        cpu.set(Element::Cpl, rng.gen_range(0..4));
        for byte in cpu.memory[..0x200].iter_mut() { *byte = rng.gen(); }
        cpu
    }

    /// Compiled procedures behave exactly like the reference interpreter, and
    /// compiling twice gives the same code.
    #[test]
    fn matches_reference_interpreter() {
        let mut rng = Pcg64::seed_from_u64(0x5EED);
        for mode in Mode::ALL {
            for _ in 0..200 {
                let n = rng.gen_range(1..8);
                let instructions: Vec<(u32, Vec<u32>)> = (0..n).map(|_| random_instruction(&mut rng, mode)).collect();
                let borrowed: Vec<(u32, &[u32])> = instructions.iter().map(|(l, ws)| (*l, &ws[..])).collect();
                let mut source = ArraySource::from_instructions(&borrowed);
                let first = compiler().compile(mode, None, &mut source).unwrap();
                let second = compiler().compile(mode, None, &mut source).unwrap();
                assert_eq!(first.code(), second.code());
                assert_eq!(first.handlers(), second.handlers());
                assert_eq!(first.name(), second.name());
                let run = Run::build(&mut source, 1000).unwrap();
                let cpu = random_cpu(&mut rng);
                let mut expected_cpu = cpu.clone();
                let expected = interpret(mode, &mut expected_cpu, &run);
                let mut actual_cpu = cpu.clone();
                let actual = first.execute(&mut actual_cpu);
                assert_eq!(outcome(&actual), outcome(&expected), "{:?}", first);
                assert_eq!(actual_cpu, expected_cpu, "{:?}", first);
            }
        }
    }

    #[test]
    fn cache_hits_and_names() {
        let compiler = compiler();
        let mut source = ArraySource::from_instructions(&[(1, &[w(M::Load0Eax), w(M::Store0Ebx)])]);
        let a = compiler.compile_real(None, &mut source).unwrap();
        let b = compiler.compile_real(None, &mut source).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let hash = Run::build(&mut source, 10).unwrap().hash();
        assert_eq!(a.name(), format!("FAST_RM_{}", hash));
        let stats = compiler.cache().statistics();
        assert_eq!((stats.hits, stats.misses, stats.publishes), (1, 1, 1));
        // An explicit name is used for new procedures.
        let mut other = ArraySource::from_instructions(&[(1, &[w(M::Load0Ecx), w(M::Store0Ebx)])]);
        let c = compiler.compile_real(Some("custom"), &mut other).unwrap();
        assert_eq!(c.name(), "custom");
        assert_eq!(compiler.cache().len(), 2);
    }

    /// Two runs with the same hash but different microcodes get distinct
    /// procedures, and neither disturbs the other.
    #[test]
    fn collisions_are_misses() {
        let compiler = compiler();
        // 100 * 31 * 31 + 1161 == 101 * 31 * 31 + 200.
        let a_words = [w(M::Load0Id), 100, w(M::Load1Id), 1161, w(M::Store0Eax), w(M::EipUpdate)];
        let b_words = [w(M::Load0Id), 101, w(M::Load1Id), 200, w(M::Store0Eax), w(M::EipUpdate)];
        let mut a_source = ArraySource::from_instructions(&[(3, &a_words)]);
        let mut b_source = ArraySource::from_instructions(&[(3, &b_words)]);
        let a_run = Run::build(&mut a_source, 10).unwrap();
        let b_run = Run::build(&mut b_source, 10).unwrap();
        assert_eq!(a_run.hash(), b_run.hash());
        assert!(a_run != b_run);
        let a = compiler.compile_real(None, &mut a_source).unwrap();
        let b = compiler.compile_real(None, &mut b_source).unwrap();
        let again = compiler.compile_real(None, &mut a_source).unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.name(), format!("{}_1", a.name()));
        assert_eq!(compiler.cache().statistics().collisions, 1);
        let mut cpu = MockCpu::new();
        again.execute(&mut cpu).unwrap();
        assert_eq!(cpu.get(Element::Eax), 100);
        b.execute(&mut cpu).unwrap();
        assert_eq!(cpu.get(Element::Eax), 101);
    }

    /// Runs whose microcodes all hash alike: `Load0Id a; Load1Id b` with
    /// `a * 31 * 31 + b` constant.
    fn colliding_source(a: u32) -> ArraySource {
        let b = 97261 - a * 961;
        ArraySource::from_instructions(&[(3, &[w(M::Load0Id), a, w(M::Load1Id), b, w(M::Store0Eax), w(M::EipUpdate)])])
    }

    fn unnamed(a: u32) -> Procedure {
        let run = Run::build(&mut colliding_source(a), 10).unwrap();
        let body = generate(&Graph::build(Mode::Real, &run).unwrap()).unwrap();
        Procedure::new(String::new(), Mode::Real, &run, body).unwrap()
    }

    #[test]
    fn names_are_chosen_when_published() {
        let cache = ProcedureCache::new();
        // Both built before either is published.
        let (b, c) = (unnamed(99), unnamed(98));
        assert_eq!(b.hash(), c.hash());
        let b = cache.publish_generated(b);
        let c = cache.publish_generated(c);
        assert_eq!(b.name(), format!("FAST_RM_{}", b.hash()));
        assert_eq!(c.name(), format!("{}_1", b.name()));
        // Publishing an equal procedure again returns the first.
        assert!(Arc::ptr_eq(&cache.publish_generated(unnamed(98)), &c));
        assert_eq!(cache.statistics().publishes, 2);
    }

    #[test]
    fn concurrent_collisions_get_distinct_names() {
        let compiler = compiler();
        let mut names: Vec<String> = std::thread::scope(|scope| {
            let threads: Vec<_> = (97..=101).map(|a| {
                let compiler = &compiler;
                scope.spawn(move || {
                    compiler.compile_real(None, &mut colliding_source(a)).unwrap().name().to_owned()
                })
            }).collect();
            threads.into_iter().map(|t| t.join().unwrap()).collect()
        });
        names.sort();
        names.dedup();
        let base = format!("FAST_RM_{}", unnamed(100).hash());
        let mut expected: Vec<String> = (1..5).map(|n| format!("{}_{}", base, n)).collect();
        expected.push(base);
        expected.sort();
        assert_eq!(names, expected);
        assert_eq!(compiler.cache().len(), 5);
        assert_eq!(compiler.cache().statistics().publishes, 5);
    }

    #[test]
    fn modes_have_separate_namespaces() {
        let compiler = compiler();
        let words = [w(M::Load0Eax), w(M::Inc), w(M::Store0Eax), w(M::EipUpdate)];
        let mut source = ArraySource::from_instructions(&[(1, &words)]);
        let real = compiler.compile_real(None, &mut source).unwrap();
        let protected = compiler.compile_protected(None, &mut source).unwrap();
        let vm86 = compiler.compile_virtual8086(None, &mut source).unwrap();
        assert!(!Arc::ptr_eq(&real, &protected));
        assert_eq!(real.mode(), Mode::Real);
        assert_eq!(protected.mode(), Mode::Protected);
        assert_eq!(vm86.mode(), Mode::Virtual8086);
        assert!(protected.name().starts_with("FAST_PM_"));
        assert!(vm86.name().starts_with("FAST_VM_"));
        assert_eq!(compiler.cache().len(), 3);
        // The modes wrap EIP differently.
        let mut cpu = MockCpu::new();
        cpu.set(Element::Eip, 0xFFFF);
        real.execute(&mut cpu).unwrap();
        assert_eq!(cpu.get(Element::Eip), 0);
        cpu.set(Element::Eip, 0xFFFF);
        protected.execute(&mut cpu).unwrap();
        assert_eq!(cpu.get(Element::Eip), 0x1_0000);
    }

    /// Two stores survive even though the values they store are dead.
    #[test]
    fn effects_happen_in_order() {
        let compiler = compiler();
        let mut source = ArraySource::from_instructions(&[
            (1, &[w(M::Load0Eax)]),
            (3, &[w(M::MemReset), w(M::AddrId), 0x40, w(M::LoadSegDs), w(M::Store0MemByte)]),
            (2, &[w(M::Load0Id), 0x77]),
            (3, &[w(M::MemReset), w(M::AddrId), 0x41, w(M::LoadSegDs), w(M::Store0MemByte)]),
        ]);
        let p = compiler.compile_real(None, &mut source).unwrap();
        let stores: Vec<usize> = p.code().iter().enumerate()
            .filter(|(_, op)| matches!(op, Code::Apply(crate::code::Fragment::Store(_))))
            .map(|(pc, _)| pc)
            .collect();
        assert_eq!(stores.len(), 2);
        let mut cpu = MockCpu::new();
        cpu.set(Element::Eax, 0x33);
        assert_eq!(p.execute(&mut cpu).ok(), Some(4));
        assert_eq!(&cpu.memory[0x40..0x42], &[0x33, 0x77]);
        // Nothing but the stores is written back.
        assert_eq!(cpu.get(Element::Eax), 0x33);
    }

    /// Only the faulting instruction gets a handler, and a fault there
    /// commits the first instruction and nothing after.
    #[test]
    fn fault_in_middle_instruction() {
        let compiler = compiler();
        let mut source = ArraySource::from_instructions(&[
            (2, &[w(M::Load0Id), 5, w(M::Store0Ebx), w(M::EipUpdate)]),
            (2, &[w(M::Load0Eax), w(M::Load1Ecx), w(M::Div), w(M::Store0Eax), w(M::EipUpdate)]),
            (1, &[w(M::Load0Edx), w(M::Inc), w(M::Store0Edx), w(M::EipUpdate)]),
        ]);
        let p = compiler.compile_real(None, &mut source).unwrap();
        assert_eq!(p.handlers().len(), 1);
        let h = p.handlers()[0];
        assert_eq!(h.retired, 1);
        // The range covers the two divisions only.
        assert!(p.code()[h.start..h.end].iter().all(|op| !matches!(op, Code::Commit(_) | Code::Return)));
        let mut cpu = MockCpu::new();
        cpu.set(Element::Eip, 0x100);
        cpu.set(Element::Eax, 9);
        assert!(matches!(
            p.execute(&mut cpu),
            Err(Interrupt::Fault {fault, retired: 1}) if fault.vector == Vector::DivideError,
        ));
        assert_eq!(cpu.get(Element::Ebx), 5);
        assert_eq!(cpu.get(Element::Eip), 0x102);
        assert_eq!(cpu.get(Element::Eax), 9);
        assert_eq!(cpu.get(Element::Edx), 0);
    }

    #[test]
    fn real_mode_faults_lose_error_codes() {
        let mut source = ArraySource::from_instructions(&[
            (1, &[w(M::MemReset), w(M::AddrId), 0xFFFF_FFF0, w(M::LoadSegDs), w(M::Load0MemByte)]),
        ]);
        let p = compiler().compile_real(None, &mut source).unwrap();
        match p.execute(&mut MockCpu::new()) {
            Err(Interrupt::Fault {fault, retired: 0}) => assert_eq!(fault.error_code, None),
            other => panic!("{}", outcome(&other)),
        }
        let p = compiler().compile_protected(None, &mut source).unwrap();
        match p.execute(&mut MockCpu::new()) {
            Err(Interrupt::Fault {fault, retired: 0}) => assert_eq!(fault.error_code, Some(0)),
            other => panic!("{}", outcome(&other)),
        }
    }

    #[test]
    fn unsupported_microcodes_give_none() {
        let compiler = compiler();
        let mut source = ArraySource::from_instructions(&[
            (1, &[w(M::Load0Eax), w(M::Store0Ebx)]),
            (2, &[w(M::Cpuid)]),
        ]);
        assert_eq!(
            compiler.compile_real(None, &mut source).unwrap_err(),
            CompileError::Unsupported {mode: Mode::Real, microcode: M::Cpuid},
        );
        assert!(compiler.get_real(&mut source).is_none());
        assert!(compiler.cache().is_empty());
        let mut hlt = ArraySource::from_instructions(&[(1, &[w(M::Hlt)])]);
        assert!(compiler.get_real(&mut hlt).is_some());
        assert!(compiler.get_virtual8086(&mut hlt).is_none());
    }

    #[test]
    fn mode_switch_is_reported_after_commit() {
        let compiler = compiler();
        let mut source = ArraySource::from_instructions(&[
            (2, &[w(M::Load0Id), 1, w(M::Store0Ebx), w(M::EipUpdate)]),
            (3, &[w(M::Load0Id), 1, w(M::Store0Cr0), w(M::EipUpdate)]),
        ]);
        let p = compiler.compile_real(None, &mut source).unwrap();
        let mut cpu = MockCpu::new();
        assert!(matches!(p.execute(&mut cpu), Err(Interrupt::ModeSwitch)));
        assert!(cpu.is_protected_mode());
        assert_eq!(cpu.get(Element::Ebx), 1);
        assert_eq!(cpu.get(Element::Eip), 5);
        // Writing the same value again is not a switch.
        assert_eq!(p.execute(&mut cpu).ok(), Some(2));
        // A switch that is not in the last instruction is refused.
        let mut early = ArraySource::from_instructions(&[
            (3, &[w(M::Load0Id), 1, w(M::Store0Cr0)]),
            (2, &[w(M::Load0Id), 1, w(M::Store0Ebx)]),
        ]);
        assert!(compiler.get_real(&mut early).is_none());
    }

    #[test]
    fn instruction_limit() {
        let compiler = compiler();
        let words = [w(M::Load0Eax), w(M::Inc), w(M::Store0Eax), w(M::EipUpdate)];
        let instructions: Vec<(u32, &[u32])> = (0..10).map(|_| (1, &words[..])).collect();
        let mut source = ArraySource::from_instructions(&instructions);
        compiler.set_max_instructions(4);
        assert_eq!(compiler.max_instructions(), 4);
        let p = compiler.compile_real(None, &mut source).unwrap();
        assert_eq!((p.x86_count(), p.x86_length()), (4, 4));
        compiler.set_max_instructions(1000);
        let p = compiler.compile_real(None, &mut source).unwrap();
        assert_eq!(p.x86_count(), 10);
        let mut cpu = MockCpu::new();
        p.execute(&mut cpu).unwrap();
        assert_eq!((cpu.get(Element::Eax), cpu.get(Element::Eip)), (10, 10));
    }

    #[test]
    fn publish_keeps_the_first() {
        let cache = Arc::new(ProcedureCache::new());
        let one = Compiler::new(&Config::default(), cache.clone());
        let two = Compiler::new(&Config::default(), Arc::new(ProcedureCache::new()));
        let mut source = ArraySource::from_instructions(&[(1, &[w(M::Load0Eax), w(M::Store0Ebx)])]);
        let first = one.compile_real(None, &mut source).unwrap();
        let racer = two.compile_real(None, &mut source).unwrap();
        let winner = cache.publish(racer.clone());
        assert!(Arc::ptr_eq(&winner, &first));
        assert_eq!(cache.len(), 1);
        assert!(cache.evict(Mode::Real, first.name()));
        assert!(!cache.evict(Mode::Real, first.name()));
        assert!(cache.is_empty());
        assert_eq!(cache.names(), Vec::<String>::new());
        cache.publish(racer);
        assert_eq!(cache.names().len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
