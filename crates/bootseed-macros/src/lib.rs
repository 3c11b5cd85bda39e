use proc_macro::TokenStream;

use quote::quote;
use syn::parse_quote;
use syn::{
    Attribute, Expr, ExprArray, ExprLit, ExprPath, ItemStruct, Lit, Meta, MetaNameValue, Token,
    parse::Parser, spanned::Spanned,
};

/// Turns a step config struct into a plannable task.
///
/// Generates `ID`/`MODULE`/`PHASE`/`CONFIG_PATH` constants plus `plan` and
/// `exec`; the struct supplies `fn run(&self, doc, ctx) -> Result<()>`.
#[proc_macro_attribute]
#[allow(non_snake_case)]
pub fn Task(attr: TokenStream, item: TokenStream) -> TokenStream {
    match task_impl(attr, item) {
        Ok(ts) => ts,
        Err(e) => e.to_compile_error().into(),
    }
}

/// Implements `Module` and `ModuleExec` for a module over its task list.
#[proc_macro_attribute]
#[allow(non_snake_case)]
pub fn Module(attr: TokenStream, item: TokenStream) -> TokenStream {
    match module_impl(attr, item) {
        Ok(ts) => ts,
        Err(e) => e.to_compile_error().into(),
    }
}

fn lit_str(expr: &Expr) -> syn::Result<String> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.value()),
        _ => Err(syn::Error::new(expr.span(), "expected string literal")),
    }
}

fn lit_bool(expr: &Expr) -> syn::Result<bool> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Bool(b), ..
        }) => Ok(b.value),
        _ => Err(syn::Error::new(expr.span(), "expected bool literal")),
    }
}

fn array_elems(expr: &Expr) -> syn::Result<impl Iterator<Item = &Expr>> {
    let Expr::Array(ExprArray { elems, .. }) = expr else {
        return Err(syn::Error::new(expr.span(), "expected array literal"));
    };
    Ok(elems.iter())
}

fn array_strings(expr: &Expr) -> syn::Result<Vec<String>> {
    array_elems(expr)?.map(lit_str).collect()
}

fn array_paths(expr: &Expr) -> syn::Result<Vec<syn::Path>> {
    array_elems(expr)?
        .map(|e| match e {
            Expr::Path(ExprPath { path, .. }) => Ok(path.clone()),
            _ => Err(syn::Error::new(e.span(), "expected path (identifier)")),
        })
        .collect()
}

fn expr_type(expr: &Expr) -> syn::Result<syn::Type> {
    match expr {
        Expr::Path(ExprPath { path, .. }) => Ok(syn::Type::Path(syn::TypePath {
            qself: None,
            path: path.clone(),
        })),
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => syn::parse_str::<syn::Type>(&s.value()).map_err(|e| syn::Error::new(expr.span(), e)),
        _ => Err(syn::Error::new(expr.span(), "expected type (path) or string")),
    }
}

fn strip_own_attrs(attrs: &[Attribute]) -> Vec<Attribute> {
    attrs
        .iter()
        .filter(|a| {
            !a.path()
                .get_ident()
                .is_some_and(|ident| ident == "Task" || ident == "Module")
        })
        .cloned()
        .collect()
}

// `key = value` pairs of an attribute, keys as strings.
fn parse_pairs(attr: TokenStream) -> syn::Result<Vec<(String, MetaNameValue)>> {
    let parser = syn::punctuated::Punctuated::<Meta, Token![,]>::parse_terminated;
    let mut out = Vec::new();
    for m in parser.parse(attr)? {
        let Meta::NameValue(nv) = m else {
            return Err(syn::Error::new(m.span(), "expected key = value"));
        };
        let Some(key) = nv.path.get_ident().map(|i| i.to_string()) else {
            return Err(syn::Error::new(nv.path.span(), "expected ident key"));
        };
        out.push((key, nv));
    }
    Ok(out)
}

// `phase = "fetch"` names a `planner::Phase` variant.
fn phase_variant(phase: &str, span_of: &syn::Ident) -> syn::Result<syn::Ident> {
    let variant = match phase {
        "init" => "Init",
        "fetch" => "Fetch",
        "bootstrap" => "Bootstrap",
        other => {
            return Err(syn::Error::new(
                span_of.span(),
                format!("Task: unknown phase '{other}' (expected init, fetch or bootstrap)"),
            ));
        }
    };
    Ok(syn::Ident::new(variant, proc_macro2::Span::call_site()))
}

#[derive(Default)]
struct TaskMeta {
    id: Option<String>,
    module: Option<String>,
    phase: Option<String>,
    config_ty: Option<syn::Type>,
    config_path: Option<String>,
    after: Vec<String>,
    default_label: Option<String>,
    core: bool,
}

fn task_impl(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let mut st: ItemStruct = syn::parse(item)?;
    st.attrs = strip_own_attrs(&st.attrs);
    let struct_ident = st.ident.clone();
    let missing = |what: &str| syn::Error::new(struct_ident.span(), format!("Task: missing {what}"));

    let mut meta = TaskMeta::default();
    for (key, nv) in parse_pairs(attr)? {
        let v = &nv.value;
        match key.as_str() {
            "id" => meta.id = Some(lit_str(v)?),
            "module" => meta.module = Some(lit_str(v)?),
            "phase" => meta.phase = Some(lit_str(v)?),
            "config" => meta.config_ty = Some(expr_type(v)?),
            "config_path" => meta.config_path = Some(lit_str(v)?),
            "after" => meta.after = array_strings(v)?,
            "default_label" => meta.default_label = Some(lit_str(v)?),
            "core" => meta.core = lit_bool(v)?,
            other => {
                return Err(syn::Error::new(
                    nv.path.span(),
                    format!("unknown Task attribute key '{other}'"),
                ));
            }
        }
    }

    let id = meta.id.ok_or_else(|| missing("id"))?;
    let module = meta.module.ok_or_else(|| missing("module"))?;
    let phase = phase_variant(&meta.phase.ok_or_else(|| missing("phase"))?, &struct_ident)?;
    let default_label = meta.default_label.ok_or_else(|| missing("default_label"))?;
    let config_ty = meta.config_ty.unwrap_or_else(|| parse_quote!(#struct_ident));

    // Default config location: <module>.steps.<last id segment>.
    let config_path = match meta.config_path {
        Some(p) => p,
        None => {
            let Some(step) = id.strip_prefix(&format!("{module}.")) else {
                return Err(syn::Error::new(
                    struct_ident.span(),
                    "Task: config_path omitted but id does not start with '<module>.'",
                ));
            };
            let step = step.rsplit('.').next().unwrap_or(step);
            format!("{module}.steps.{step}")
        }
    };

    let after = meta.after;
    let core = meta.core;

    let enabled_check = if core {
        quote! {
            if !cfg.enabled {
                return Err(crate::Error::new(
                    crate::ErrorKind::Config,
                    format!("[{}].enabled=false is not allowed (core step)", #config_path),
                ));
            }
        }
    } else {
        quote! {
            if !cfg.enabled {
                return Ok(());
            }
        }
    };

    let expanded = quote! {
        #st

        impl #struct_ident {
            pub const ID: &'static str = #id;
            pub const MODULE: &'static str = #module;
            pub const PHASE: crate::planner::Phase = crate::planner::Phase::#phase;
            pub const CONFIG_PATH: &'static str = #config_path;
            pub const CORE: bool = #core;

            fn step_config(doc: &crate::config::ConfigDoc) -> crate::Result<#config_ty> {
                Ok(doc
                    .deserialize_path::<#config_ty>(#config_path)?
                    .unwrap_or_default())
            }

            pub fn plan(doc: &crate::config::ConfigDoc, plan: &mut crate::planner::Plan) -> crate::Result<()> {
                let cfg = Self::step_config(doc)?;
                #enabled_check

                let label = cfg
                    .label
                    .clone()
                    .unwrap_or_else(|| #default_label.to_string());
                plan.add(crate::planner::Task {
                    id: #id.to_string(),
                    label,
                    module: #module.to_string(),
                    phase: Self::PHASE,
                    after: vec![#(#after.to_string()),*],
                })
            }

            pub fn exec(doc: &crate::config::ConfigDoc, ctx: &mut crate::executor::ExecCtx) -> crate::Result<()> {
                let cfg = Self::step_config(doc)?;
                #enabled_check

                ctx.set_task(#id);
                if ctx.dry_run {
                    ctx.log(&format!("DRY-RUN: exec {}", #id));
                    return Ok(());
                }
                cfg.run(doc, ctx)
            }
        }
    };

    Ok(expanded.into())
}

fn module_impl(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let mut st: ItemStruct = syn::parse(item)?;
    st.attrs = strip_own_attrs(&st.attrs);
    let struct_ident = st.ident.clone();
    let missing =
        |what: &str| syn::Error::new(struct_ident.span(), format!("Module: missing {what}"));

    let mut id: Option<String> = None;
    let mut config_ty: Option<syn::Type> = None;
    let mut config_path: Option<String> = None;
    let mut tasks: Option<Vec<syn::Path>> = None;
    for (key, nv) in parse_pairs(attr)? {
        let v = &nv.value;
        match key.as_str() {
            "id" => id = Some(lit_str(v)?),
            "config" => config_ty = Some(expr_type(v)?),
            "config_path" => config_path = Some(lit_str(v)?),
            "tasks" => tasks = Some(array_paths(v)?),
            other => {
                return Err(syn::Error::new(
                    nv.path.span(),
                    format!("unknown Module attribute key '{other}'"),
                ));
            }
        }
    }

    let id = id.ok_or_else(|| missing("id"))?;
    let config_ty = config_ty.ok_or_else(|| missing("config"))?;
    let config_path = config_path.unwrap_or_else(|| id.clone());
    let tasks = tasks.ok_or_else(|| missing("tasks"))?;

    let plan_tasks = tasks.iter().map(|p| quote! { #p::plan(doc, plan)?; });
    let reg_tasks = tasks.iter().map(|p| quote! { reg.add(#p::ID, #p::exec)?; });

    let expanded = quote! {
        #st

        impl crate::modules::Module for #struct_ident {
            fn id(&self) -> &'static str {
                #id
            }

            fn detect(&self, doc: &crate::config::ConfigDoc) -> bool {
                doc.has_table_path(#config_path)
            }

            fn plan(&self, doc: &crate::config::ConfigDoc, plan: &mut crate::planner::Plan) -> crate::Result<()> {
                let cfg: #config_ty = doc
                    .deserialize_path::<#config_ty>(#config_path)?
                    .unwrap_or_default();
                if !cfg.enabled {
                    return Ok(());
                }
                cfg.validate(doc)?;

                #(#plan_tasks)*
                Ok(())
            }
        }

        impl crate::executor::ModuleExec for #struct_ident {
            fn register_tasks(reg: &mut crate::executor::TaskRegistry) -> crate::Result<()> {
                #(#reg_tasks)*
                Ok(())
            }
        }
    };

    Ok(expanded.into())
}
