//! Reconstruction of IR trees out of solver-native expressions, driven by
//! the declaration kind. Parameterized declarations (extracts, extensions)
//! are read through the raw API, the way the solver bindings themselves
//! reach down for translation.

use crate::ast::{self, Arg, AstRef, Op};
use crate::error::ChimeError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CStr;
use std::hash::{DefaultHasher, Hash, Hasher};
use z3::Context;
use z3::ast::{Ast, Dynamic};
use z3_sys::DeclKind;

fn smt_err(msg: &str) -> ChimeError {
    ChimeError::Smt(msg.to_string())
}

struct AppInfo {
    kind: DeclKind,
    kind_raw: u32,
    children: Vec<Dynamic>,
    int_params: Vec<u32>,
    symbol: Option<String>,
}

/// Pull declaration kind, children, integer parameters, and symbol name out
/// of a native expression in one unsafe pass.
fn inspect(d: &Dynamic, param_count: usize, want_symbol: bool) -> Result<AppInfo, ChimeError> {
    let ctx = Context::thread_local();
    let raw_ctx = ctx.get_z3_context();
    let raw = d.get_z3_ast();
    unsafe {
        let app = z3_sys::Z3_to_app(raw_ctx, raw).ok_or_else(|| smt_err("not an application"))?;
        let decl =
            z3_sys::Z3_get_app_decl(raw_ctx, app).ok_or_else(|| smt_err("no declaration"))?;
        let kind = z3_sys::Z3_get_decl_kind(raw_ctx, decl);
        let n = z3_sys::Z3_get_app_num_args(raw_ctx, app);
        let mut children = Vec::with_capacity(n as usize);
        for i in 0..n {
            let child = z3_sys::Z3_get_app_arg(raw_ctx, app, i)
                .ok_or_else(|| smt_err("missing child"))?;
            children.push(Dynamic::wrap(&ctx, child));
        }
        let int_params = (0..param_count)
            .map(|i| z3_sys::Z3_get_decl_int_parameter(raw_ctx, decl, i as u32) as u32)
            .collect();
        let symbol = if want_symbol {
            let sym = z3_sys::Z3_get_decl_name(raw_ctx, decl)
                .ok_or_else(|| smt_err("unnamed declaration"))?;
            let ptr = z3_sys::Z3_get_symbol_string(raw_ctx, sym);
            if ptr.is_null() {
                None
            } else {
                Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        } else {
            None
        };
        Ok(AppInfo {
            kind,
            kind_raw: kind as u32,
            children,
            int_params,
            symbol,
        })
    }
}

fn op_of(kind: DeclKind) -> Option<Op> {
    Some(match kind {
        DeclKind::EQ | DeclKind::IFF => Op::Eq,
        DeclKind::DISTINCT => Op::Ne,
        DeclKind::ITE => Op::If,
        DeclKind::AND => Op::BoolAnd,
        DeclKind::OR => Op::BoolOr,
        DeclKind::XOR => Op::BoolXor,
        DeclKind::NOT => Op::BoolNot,
        DeclKind::IMPLIES => Op::Implies,
        DeclKind::BNEG => Op::Neg,
        DeclKind::BADD => Op::Add,
        DeclKind::BSUB => Op::Sub,
        DeclKind::BMUL => Op::Mul,
        DeclKind::BSDIV | DeclKind::BUDIV => Op::Div,
        DeclKind::BSREM | DeclKind::BUREM | DeclKind::BSMOD => Op::Mod,
        DeclKind::POWER => Op::Pow,
        DeclKind::ULEQ => Op::ULe,
        DeclKind::SLEQ => Op::SLe,
        DeclKind::UGEQ => Op::UGe,
        DeclKind::SGEQ => Op::SGe,
        DeclKind::ULT => Op::ULt,
        DeclKind::SLT => Op::SLt,
        DeclKind::UGT => Op::UGt,
        DeclKind::SGT => Op::SGt,
        DeclKind::BAND => Op::And,
        DeclKind::BOR => Op::Or,
        DeclKind::BNOT => Op::Invert,
        DeclKind::BXOR => Op::Xor,
        DeclKind::CONCAT => Op::Concat,
        DeclKind::SIGN_EXT => Op::SignExt,
        DeclKind::ZERO_EXT => Op::ZeroExt,
        DeclKind::EXTRACT => Op::Extract,
        DeclKind::REPEAT => Op::Repeat,
        DeclKind::BSHL => Op::Shl,
        DeclKind::BLSHR => Op::LShR,
        DeclKind::BASHR => Op::Shr,
        DeclKind::EXT_ROTATE_LEFT => Op::RotateLeft,
        DeclKind::EXT_ROTATE_RIGHT => Op::RotateRight,
        _ => return None,
    })
}

/// Operators that are binary in the IR but n-ary in native form; their
/// extra children get left-folded into nested applications.
fn left_folds(op: Op) -> bool {
    matches!(
        op,
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::And | Op::Or | Op::Xor
    )
}

pub(crate) fn abstract_dynamic(
    cache: &RefCell<HashMap<u64, AstRef>>,
    d: &Dynamic,
) -> Result<AstRef, ChimeError> {
    let mut hasher = DefaultHasher::new();
    d.hash(&mut hasher);
    let key = hasher.finish();
    if let Some(hit) = cache.borrow().get(&key) {
        return Ok(hit.clone());
    }

    let probe = inspect(d, 0, false)?;
    let node = match probe.kind {
        DeclKind::TRUE => ast::bool_val(true),
        DeclKind::FALSE => ast::bool_val(false),
        DeclKind::BNUM => {
            let bv = d.as_bv().ok_or_else(|| smt_err("numeral is not a bit-vector"))?;
            let v = bv
                .as_u64()
                .ok_or_else(|| smt_err("numeral wider than 64 bits"))?;
            ast::bvv(v, bv.get_size())
        }
        DeclKind::UNINTERPRETED => {
            let info = inspect(d, 0, true)?;
            let bv = d
                .as_bv()
                .ok_or_else(|| smt_err("uninterpreted constant is not a bit-vector"))?;
            let name = info.symbol.ok_or_else(|| smt_err("anonymous constant"))?;
            ast::bv_sym(name, bv.get_size())
        }
        kind => {
            let op = op_of(kind).ok_or(ChimeError::UnknownDecl(probe.kind_raw))?;
            let params = inspect(d, op.parameter_count(), false)?.int_params;
            let mut children = Vec::with_capacity(probe.children.len());
            for c in &probe.children {
                children.push(abstract_dynamic(cache, c)?);
            }
            build(op, &params, children)?
        }
    };
    cache.borrow_mut().insert(key, node.clone());
    Ok(node)
}

fn build(op: Op, params: &[u32], children: Vec<AstRef>) -> Result<AstRef, ChimeError> {
    let mut args: Vec<Arg> = params
        .iter()
        .map(|p| Arg::Val(ast::Value::UInt(*p as u64)))
        .collect();
    if left_folds(op) && children.len() > 2 {
        let mut iter = children.into_iter();
        let first = iter.next().ok_or_else(|| smt_err("missing operand"))?;
        let folded = iter.try_fold(first, |acc, c| {
            ast::make(op, vec![Arg::Node(acc), Arg::Node(c)])
        })?;
        return Ok(folded);
    }
    args.extend(children.into_iter().map(Arg::Node));
    ast::make(op, args)
}
