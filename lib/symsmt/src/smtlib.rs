//! A [`Backend`] that drives an external solver process over SMT-LIB v2.
use std::{
    io::{self, BufRead, BufReader, BufWriter, Write},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError},
    },
    thread,
    time::{Duration, Instant},
};

use itertools::Itertools;
use rustc_hash::FxHashMap;
use symsmt_common::dbg;
use symsmt_config::{SmtSolver, SolverConfig};
use tracing::{debug, trace, warn};

use crate::{
    backend::{Backend, CheckOutcome, TermOp},
    error::{Error, Result},
    expr::Literal,
    model::{ArgPattern, FuncEntry, FuncTable, Value},
    sexp::{self, Atom, Sexp},
    sort::{FuncSort, Sort},
};

/// A running solver. Commands are written to its stdin, responses are read from its stdout by a
/// separate thread so that `check-sat` can be abandoned when the deadline expires.
///
/// Dropping the backend terminates the process and dumps the transcript when `dump_smt` is set.
pub struct SmtLib {
    child: Child,
    /// `None` once the process has been killed.
    stdin: Option<BufWriter<ChildStdin>>,
    responses: mpsc::Receiver<io::Result<String>>,
    transcript: String,
    dump_name: String,
    fresh: usize,
    definitions: Option<FxHashMap<String, Definition>>,
}

impl SmtLib {
    pub fn spawn(config: &SolverConfig) -> Result<SmtLib> {
        SmtLib::spawn_named(config, dbg::next_dump_name())
    }

    pub(crate) fn spawn_named(config: &SolverConfig, dump_name: String) -> Result<SmtLib> {
        let program = config.program();
        let mut child = Command::new(&program)
            .args(config.solver.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(Error::engine("cannot connect to the solver's stdio"));
        };
        let (tx, responses) = mpsc::channel();
        thread::Builder::new()
            .name("symsmt-smtlib-reader".into())
            .spawn(move || read_responses(stdout, tx))?;
        debug!(program = %program.display(), solver = %config.solver, "spawned solver");

        let mut smt = SmtLib {
            child,
            stdin: Some(BufWriter::new(stdin)),
            responses,
            transcript: String::new(),
            dump_name,
            fresh: 0,
            definitions: None,
        };
        smt.command("(set-option :produce-models true)")?;
        if config.solver == SmtSolver::CVC5 {
            smt.command("(set-logic ALL)")?;
        }
        Ok(smt)
    }

    /// Everything sent to and received from the solver so far.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    fn command(&mut self, cmd: &str) -> Result<()> {
        trace!("> {cmd}");
        self.transcript.push_str(cmd);
        self.transcript.push('\n');
        let stdin = self.stdin.as_mut().ok_or_else(terminated)?;
        writeln!(stdin, "{cmd}")?;
        Ok(())
    }

    /// Sends `cmd` and waits for its response. `None` means that `deadline` expired first.
    fn query(&mut self, cmd: &str, deadline: Option<Instant>) -> Result<Option<Sexp>> {
        self.command(cmd)?;
        self.stdin.as_mut().ok_or_else(terminated)?.flush()?;

        let received = match deadline {
            Some(deadline) => {
                match self
                    .responses
                    .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                {
                    Ok(received) => received,
                    Err(RecvTimeoutError::Timeout) => return Ok(None),
                    Err(RecvTimeoutError::Disconnected) => return Err(terminated()),
                }
            }
            None => self.responses.recv().map_err(|_| terminated())?,
        };
        let text = received?;
        trace!("< {}", text.trim_end());
        for line in text.lines() {
            self.transcript.push_str("; ");
            self.transcript.push_str(line);
            self.transcript.push('\n');
        }

        let response = sexp::parse(&text)
            .map_err(|err| Error::engine(format!("cannot parse solver response: {err}")))?;
        if response.is_app("error") {
            let msg = match response.as_list() {
                Some([_, Sexp::Atom(Atom::Str(msg))]) => msg.clone(),
                _ => response.to_string(),
            };
            return Err(Error::Engine(msg));
        }
        Ok(Some(response))
    }

    fn ask(&mut self, cmd: &str) -> Result<Sexp> {
        self.query(cmd, None)?.ok_or_else(terminated)
    }

    fn reason_unknown(&mut self) -> String {
        match self.ask("(get-info :reason-unknown)") {
            Ok(Sexp::List(items)) if items.len() == 2 => {
                match &items[1] {
                    Sexp::Atom(Atom::Str(reason) | Atom::S(reason) | Atom::Q(reason)) => {
                        reason.clone()
                    }
                    reason => reason.to_string(),
                }
            }
            _ => "unknown".to_string(),
        }
    }

    fn kill(&mut self) {
        self.stdin = None;
        if let Err(err) = self.child.kill() {
            warn!(%err, "cannot kill solver");
        }
        let _ = self.child.wait();
    }

    fn definitions(&mut self) -> Result<&FxHashMap<String, Definition>> {
        if self.definitions.is_none() {
            let model = self.ask("(get-model)")?;
            self.definitions = Some(parse_definitions(&model)?);
        }
        self.definitions.as_ref().ok_or_else(terminated)
    }
}

fn terminated() -> Error {
    Error::engine("the solver process is not running")
}

/// Forwards each complete s-expression printed by the solver.
fn read_responses(stdout: ChildStdout, tx: mpsc::Sender<io::Result<String>>) {
    let mut buf = String::new();
    for line in BufReader::new(stdout).lines() {
        match line {
            Ok(line) => {
                buf.push_str(&line);
                buf.push('\n');
                if sexp::is_complete(&buf) && tx.send(Ok(std::mem::take(&mut buf))).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = tx.send(Err(err));
                return;
            }
        }
    }
}

fn quote(name: &str) -> Result<String> {
    if name.is_empty() || name.contains(['|', '\\']) {
        return Err(Error::InvalidOperand(format!("`{name}` cannot be written as an SMT-LIB symbol")));
    }
    Ok(format!("|{name}|"))
}

impl Backend for SmtLib {
    type Term = Arc<str>;
    type Fun = String;

    fn declare_const(&mut self, name: &str, sort: &Sort) -> Result<Arc<str>> {
        let symbol = quote(name)?;
        self.command(&format!("(declare-fun {symbol} () {sort})"))?;
        Ok(symbol.into())
    }

    fn declare_fun(&mut self, name: &str, sort: &FuncSort) -> Result<String> {
        let symbol = quote(name)?;
        self.command(&format!("(declare-fun {symbol} {sort})"))?;
        Ok(name.to_string())
    }

    fn literal(&mut self, lit: &Literal) -> Result<Arc<str>> {
        Ok(lit.to_string().into())
    }

    fn apply(&mut self, op: TermOp, args: &[Arc<str>]) -> Result<Arc<str>> {
        Ok(format!("({op} {})", args.iter().join(" ")).into())
    }

    fn call(&mut self, fun: &String, args: &[Arc<str>]) -> Result<Arc<str>> {
        Ok(format!("(|{fun}| {})", args.iter().join(" ")).into())
    }

    fn share(&mut self, term: Arc<str>, sort: &Sort) -> Result<Arc<str>> {
        let symbol = format!("|%t{}|", self.fresh);
        self.fresh += 1;
        self.command(&format!("(define-fun {symbol} () {sort} {term})"))?;
        Ok(symbol.into())
    }

    fn assert(&mut self, term: &Arc<str>) -> Result<()> {
        self.command(&format!("(assert {term})"))
    }

    fn check(&mut self, deadline: Option<Duration>) -> Result<CheckOutcome> {
        self.definitions = None;
        let deadline = deadline.and_then(|timeout| Instant::now().checked_add(timeout));
        let Some(answer) = self.query("(check-sat)", deadline)? else {
            warn!("solver missed its deadline");
            self.kill();
            return Ok(CheckOutcome::Unknown("timeout".to_string()));
        };
        match answer.as_symbol() {
            Some("sat") => Ok(CheckOutcome::Sat),
            Some("unsat") => Ok(CheckOutcome::Unsat),
            Some("unknown") => Ok(CheckOutcome::Unknown(self.reason_unknown())),
            _ => Err(Error::engine(format!("unexpected answer to `check-sat`: `{answer}`"))),
        }
    }

    fn const_value(&mut self, term: &Arc<str>, sort: &Sort) -> Result<Value> {
        let response = self.ask(&format!("(get-value ({term}))"))?;
        match response.as_list() {
            Some([pair]) => {
                match pair.as_list() {
                    Some([_, value]) => Value::from_sexp(value, sort),
                    _ => Err(Error::engine(format!("malformed `get-value` response: `{response}`"))),
                }
            }
            _ => Err(Error::engine(format!("malformed `get-value` response: `{response}`"))),
        }
    }

    fn fun_interp(&mut self, fun: &String, sort: &FuncSort) -> Result<FuncTable> {
        interpretation(self.definitions()?, fun, sort)
    }
}

impl Drop for SmtLib {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.command("(exit)");
            if let Some(stdin) = self.stdin.as_mut() {
                let _ = stdin.flush();
            }
            self.kill();
        }
        if let Err(err) = dbg::dump_smt(&self.dump_name, &self.transcript) {
            warn!(%err, "cannot dump solver transcript");
        }
    }
}

/// A `define-fun` read from `(get-model)`.
#[derive(Debug)]
struct Definition {
    params: Vec<String>,
    body: Sexp,
}

fn parse_definitions(model: &Sexp) -> Result<FxHashMap<String, Definition>> {
    let malformed = || Error::engine(format!("malformed model: `{model}`"));
    let items = model.as_list().ok_or_else(malformed)?;
    // Older z3 versions wrap the definitions in `(model ...)`.
    let items = match items {
        [head, rest @ ..] if head.as_symbol() == Some("model") => rest,
        _ => items,
    };
    let mut definitions = FxHashMap::default();
    for item in items {
        let Some([keyword, name, params, _range, body]) = item.as_list() else { continue };
        if keyword.as_symbol() != Some("define-fun") {
            continue;
        }
        let name = name.as_symbol().ok_or_else(malformed)?;
        let params = params
            .as_list()
            .ok_or_else(malformed)?
            .iter()
            .map(|param| {
                param
                    .as_list()
                    .and_then(|param| param.first())
                    .and_then(Sexp::as_symbol)
                    .map(str::to_string)
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(malformed)?;
        definitions.insert(name.to_string(), Definition { params, body: body.clone() });
    }
    Ok(definitions)
}

/// Turns the definition of `name` into a table. Bodies are decision trees of `ite` whose
/// conditions test parameters against values, possibly behind a call to a helper definition.
fn interpretation(
    definitions: &FxHashMap<String, Definition>,
    name: &str,
    sort: &FuncSort,
) -> Result<FuncTable> {
    let Some(def) = definitions.get(name) else {
        return Ok(FuncTable::constant_default(sort.clone()));
    };
    let tree = DecisionTree { name, params: &def.params, sort };
    if def.params.len() != sort.arity() {
        return Err(tree.unsupported(&def.body));
    }
    let body = inline_helpers(definitions, &def.body);
    let mut entries = vec![];
    tree.collect(&body, &vec![ArgPattern::Any; sort.arity()], &mut entries)?;
    let default = entries.pop().ok_or_else(|| tree.unsupported(&body))?.value;
    FuncTable::new(sort.clone(), entries, default)
}

/// Replaces a body that only calls another definition by that definition's body.
fn inline_helpers(definitions: &FxHashMap<String, Definition>, body: &Sexp) -> Sexp {
    let mut body = body.clone();
    for _ in 0..definitions.len() {
        let Some((head, args)) = body.as_list().and_then(<[Sexp]>::split_first) else { break };
        let Some(helper) = head.as_symbol().and_then(|head| definitions.get(head)) else { break };
        if helper.params.len() != args.len() {
            break;
        }
        let inlined = {
            let subst: FxHashMap<&str, &Sexp> =
                helper.params.iter().map(String::as_str).zip(args).collect();
            substitute(&helper.body, &subst)
        };
        body = inlined;
    }
    body
}

fn substitute(sexp: &Sexp, subst: &FxHashMap<&str, &Sexp>) -> Sexp {
    match sexp {
        Sexp::Atom(Atom::S(s) | Atom::Q(s)) if subst.contains_key(s.as_str()) => {
            (*subst[s.as_str()]).clone()
        }
        Sexp::Atom(_) => sexp.clone(),
        Sexp::List(items) => Sexp::List(items.iter().map(|item| substitute(item, subst)).collect()),
    }
}

enum Cond {
    Const(bool),
    /// The condition holds exactly on the arguments matching the pattern, or exactly off them
    /// when the flag is false.
    Match(Vec<ArgPattern>, bool),
}

struct DecisionTree<'a> {
    name: &'a str,
    params: &'a [String],
    sort: &'a FuncSort,
}

impl DecisionTree<'_> {
    /// Pushes one entry per leaf, in the order a first-match lookup must try them. The last entry
    /// is the one reached through `prefix` alone.
    fn collect(&self, node: &Sexp, prefix: &[ArgPattern], out: &mut Vec<FuncEntry>) -> Result<()> {
        let Some([_, cond, then, els]) = node.as_list().filter(|_| node.is_app("ite")) else {
            let value =
                Value::from_sexp(node, self.sort.range()).map_err(|_| self.unsupported(node))?;
            out.push(FuncEntry { args: prefix.to_vec(), value });
            return Ok(());
        };
        match self.condition(cond)? {
            Cond::Const(true) => self.collect(then, prefix, out),
            Cond::Const(false) => self.collect(els, prefix, out),
            Cond::Match(pattern, positive) => {
                let (hit, miss) = if positive { (then, els) } else { (els, then) };
                if let Some(merged) = merge(prefix, &pattern) {
                    self.collect(hit, &merged, out)?;
                }
                self.collect(miss, prefix, out)
            }
        }
    }

    fn condition(&self, cond: &Sexp) -> Result<Cond> {
        let mut pattern = vec![ArgPattern::Any; self.params.len()];
        match cond.as_symbol() {
            Some("true") => return Ok(Cond::Const(true)),
            Some("false") => return Ok(Cond::Const(false)),
            _ => {}
        }
        if let Some(i) = self.param(cond) {
            if self.sort.domain()[i] != Sort::Bool {
                return Err(self.unsupported(cond));
            }
            pattern[i] = ArgPattern::Exact(Value::Bool(true));
            return Ok(Cond::Match(pattern, true));
        }
        let Some([head, args @ ..]) = cond.as_list() else {
            return Err(self.unsupported(cond));
        };
        match (head.as_symbol(), args) {
            (Some("not"), [inner]) => {
                match self.condition(inner)? {
                    Cond::Const(b) => Ok(Cond::Const(!b)),
                    Cond::Match(pattern, positive) => Ok(Cond::Match(pattern, !positive)),
                }
            }
            (Some("="), [lhs, rhs]) => {
                let (i, value) = match (self.param(lhs), self.param(rhs)) {
                    (Some(i), None) => (i, rhs),
                    (None, Some(i)) => (i, lhs),
                    _ => return Err(self.unsupported(cond)),
                };
                let value = Value::from_sexp(value, &self.sort.domain()[i])
                    .map_err(|_| self.unsupported(cond))?;
                pattern[i] = ArgPattern::Exact(value);
                Ok(Cond::Match(pattern, true))
            }
            (Some("and"), conjuncts) => {
                for conjunct in conjuncts {
                    match self.condition(conjunct)? {
                        Cond::Const(true) => {}
                        Cond::Const(false) => return Ok(Cond::Const(false)),
                        Cond::Match(p, true) => {
                            let Some(merged) = merge(&pattern, &p) else {
                                return Ok(Cond::Const(false));
                            };
                            pattern = merged;
                        }
                        Cond::Match(_, false) => return Err(self.unsupported(cond)),
                    }
                }
                if pattern.iter().all(|p| *p == ArgPattern::Any) {
                    Ok(Cond::Const(true))
                } else {
                    Ok(Cond::Match(pattern, true))
                }
            }
            _ => Err(self.unsupported(cond)),
        }
    }

    fn param(&self, sexp: &Sexp) -> Option<usize> {
        let name = sexp.as_symbol()?;
        self.params.iter().position(|param| param == name)
    }

    fn unsupported(&self, sexp: &Sexp) -> Error {
        Error::engine(format!("unsupported interpretation of `{}`: `{sexp}`", self.name))
    }
}

/// The patterns matching both `a` and `b`, or `None` if nothing does.
fn merge(a: &[ArgPattern], b: &[ArgPattern]) -> Option<Vec<ArgPattern>> {
    a.iter()
        .zip(b)
        .map(|(a, b)| {
            match (a, b) {
                (ArgPattern::Any, p) | (p, ArgPattern::Any) => Some(p.clone()),
                (ArgPattern::Exact(v), ArgPattern::Exact(w)) if v == w => Some(a.clone()),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use num_rational::BigRational;

    use super::*;

    fn int(n: i64) -> Value {
        Value::Int(n.into())
    }

    fn real(n: i64, d: i64) -> Value {
        Value::Real(BigRational::new(n.into(), d.into()))
    }

    fn fsort(domain: impl IntoIterator<Item = Sort>, range: Sort) -> FuncSort {
        Sort::func(domain, range).unwrap().as_func().unwrap().clone()
    }

    fn table(model: &str, name: &str, sort: &FuncSort) -> Result<FuncTable> {
        let definitions = parse_definitions(&sexp::parse(model).unwrap())?;
        interpretation(&definitions, name, sort)
    }

    #[test]
    fn flat_decision_tree() {
        let model = r#"(
          (define-fun x () Real (- 4.0))
          (define-fun n () Int 1)
          (define-fun f ((x!0 Int) (x!1 Int)) Real
            (ite (and (= x!0 1) (= x!1 2)) 8.0 (ite (= x!0 3) (/ 1.0 2.0) 0.0)))
        )"#;
        let sort = fsort([Sort::Int, Sort::Int], Sort::Real);
        let f = table(model, "f", &sort).unwrap();
        assert_eq!(f.entries(), [
            FuncEntry::exact([int(1), int(2)], real(8, 1)),
            FuncEntry { args: vec![ArgPattern::Exact(int(3)), ArgPattern::Any], value: real(1, 2) },
        ]);
        assert_eq!(f.default_value(), &real(0, 1));
        assert_eq!(f.apply(&[int(1), int(2)]).unwrap(), real(8, 1));
        assert_eq!(f.apply(&[int(3), int(9)]).unwrap(), real(1, 2));
        assert_eq!(f.apply(&[int(2), int(2)]).unwrap(), real(0, 1));
    }

    #[test]
    fn nested_trees_and_boolean_parameters() {
        let model = r#"(model
          (define-fun g ((|x y| Bool) (k Int)) Int
            (ite |x y| (ite (= (- 1) k) 5 6) (ite (not (= k 0)) 7 8)))
        )"#;
        let sort = fsort([Sort::Bool, Sort::Int], Sort::Int);
        let g = table(model, "g", &sort).unwrap();
        assert_eq!(g.apply(&[Value::Bool(true), int(-1)]).unwrap(), int(5));
        assert_eq!(g.apply(&[Value::Bool(true), int(4)]).unwrap(), int(6));
        assert_eq!(g.apply(&[Value::Bool(false), int(0)]).unwrap(), int(8));
        assert_eq!(g.apply(&[Value::Bool(false), int(3)]).unwrap(), int(7));
        assert_eq!(g.default_value(), &int(7));
    }

    #[test]
    fn helper_definitions_are_inlined() {
        let model = r#"(
          (define-fun h ((x!0 Int)) Bool (h!0 x!0))
          (define-fun h!0 ((y Int)) Bool (ite (= y 3) true false))
        )"#;
        let sort = fsort([Sort::Int], Sort::Bool);
        let h = table(model, "h", &sort).unwrap();
        assert_eq!(h.entries(), [FuncEntry::exact([int(3)], Value::Bool(true))]);
        assert_eq!(h.default_value(), &Value::Bool(false));
    }

    #[test]
    fn contradictions_and_constants() {
        let model = r#"(
          (define-fun f ((a Int)) Int (ite (and (= a 1) (= a 2)) 5 (ite true 6 7)))
          (define-fun c ((a Int)) Int 9)
        )"#;
        let sort = fsort([Sort::Int], Sort::Int);
        let f = table(model, "f", &sort).unwrap();
        assert!(f.entries().is_empty());
        assert_eq!(f.default_value(), &int(6));
        let c = table(model, "c", &sort).unwrap();
        assert_eq!(c.apply(&[int(100)]).unwrap(), int(9));
    }

    #[test]
    fn missing_functions_get_a_default_table() {
        let sort = fsort([Sort::Int, Sort::Real], Sort::Real);
        let f = table("()", "f", &sort).unwrap();
        assert!(f.entries().is_empty());
        assert_eq!(f.default_value(), &real(0, 1));
    }

    #[test]
    fn unsupported_bodies_are_reported() {
        let model = r#"(
          (define-fun f ((a Int) (b Int)) Int (ite (= a b) 1 0))
          (define-fun g ((a Int)) Int (+ a 1))
        )"#;
        let sort = fsort([Sort::Int, Sort::Int], Sort::Int);
        assert!(matches!(table(model, "f", &sort), Err(Error::Engine(_))));
        let sort = fsort([Sort::Int], Sort::Int);
        assert!(matches!(table(model, "g", &sort), Err(Error::Engine(_))));
    }

    #[test]
    fn symbols_are_quoted() {
        assert_eq!(quote("x y").unwrap(), "|x y|");
        assert!(quote("a|b").is_err());
        assert!(quote("").is_err());
    }
}
