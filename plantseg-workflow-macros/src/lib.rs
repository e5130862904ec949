use proc_macro::TokenStream;
use proc_macro2::Span;
use proc_macro_error::{abort, proc_macro_error};
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, punctuated::Punctuated, FnArg, ItemFn, Lit, LitStr, Meta, MetaList,
    ReturnType, Token,
};

const IS_ROOT: &str = "is_root";
const IS_LEAF: &str = "is_leaf";
const IS_MULTIOUTPUT: &str = "is_multioutput";
const LIST_INPUTS: &str = "list_inputs";
const LIST_PRIVATE_PARAMS: &str = "list_private_params";
const NAME: &str = "name";

fn parse_name_list(list: &MetaList) -> Vec<String> {
    list.parse_args_with(Punctuated::<LitStr, Token![,]>::parse_terminated)
        .unwrap_or_else(|e| abort!(list, "Expected a list of string literals: {}", e))
        .iter()
        .map(LitStr::value)
        .collect()
}

/// Marks a function as a workflow task.
///
/// The function must have the shape
/// `fn name(args: &CallArgs) -> anyhow::Result<Returned>`. It is kept as is,
/// and a companion `fn name_tracked(registry: &FunctionRegistry) ->
/// Result<TrackedTask>` is generated that registers it and returns the
/// tracked wrapper.
///
/// # Attributes
/// - `is_root`, `is_leaf`: node role (mutually exclusive).
/// - `is_multioutput`: the function may return a tuple of images.
/// - `list_inputs("a", "b")`: parameters recorded as external inputs.
/// - `list_private_params("c")`: parameters that must be passed explicitly.
/// - `name = "..."`: registered name, defaults to the function name.
#[proc_macro_attribute]
#[proc_macro_error]
pub fn task_tracker(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr_args =
        syn::parse::Parser::parse2(Punctuated::<Meta, Token![,]>::parse_terminated, attr.into())
            .unwrap_or_else(|e| abort!(e.span(), "Failed to parse task_tracker attributes: {}", e));

    let mut is_root = false;
    let mut is_leaf = false;
    let mut is_multioutput = false;
    let mut list_inputs: Vec<String> = Vec::new();
    let mut list_private_params: Vec<String> = Vec::new();
    let mut name: Option<String> = None;

    for meta in &attr_args {
        match meta {
            Meta::Path(path) if path.is_ident(IS_ROOT) => is_root = true,
            Meta::Path(path) if path.is_ident(IS_LEAF) => is_leaf = true,
            Meta::Path(path) if path.is_ident(IS_MULTIOUTPUT) => is_multioutput = true,
            Meta::List(list) if list.path.is_ident(LIST_INPUTS) => {
                list_inputs.extend(parse_name_list(list));
            }
            Meta::List(list) if list.path.is_ident(LIST_PRIVATE_PARAMS) => {
                list_private_params.extend(parse_name_list(list));
            }
            Meta::NameValue(nv) if nv.path.is_ident(NAME) => {
                if let syn::Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(lit) = &expr_lit.lit {
                        name = Some(lit.value());
                    } else {
                        abort!(expr_lit, "Expected a string literal for name");
                    }
                } else {
                    abort!(nv.value, "Expected a string literal for name");
                }
            }
            other => abort!(other, "Unsupported task_tracker attribute"),
        }
    }

    if is_root && is_leaf {
        abort!(
            Span::call_site(),
            "A node cannot be both root and leaf at the same time"
        );
    }

    let input = parse_macro_input!(item as ItemFn);
    let fn_name = &input.sig.ident;
    let fn_vis = &input.vis;
    let tracked_name = format_ident!("{}_tracked", fn_name);
    let task_name = name.unwrap_or_else(|| fn_name.to_string());

    if input.sig.asyncness.is_some() {
        abort!(input.sig.fn_token, "Tracked functions must be synchronous");
    }
    let single_typed_arg =
        input.sig.inputs.len() == 1 && matches!(input.sig.inputs.first(), Some(FnArg::Typed(_)));
    if !single_typed_arg {
        abort!(
            input.sig.inputs,
            "Tracked functions take exactly one `&CallArgs` argument"
        );
    }
    if let ReturnType::Default = input.sig.output {
        abort!(
            input.sig.ident,
            "Tracked functions must return anyhow::Result<Returned>"
        );
    }

    let root_call = if is_root { quote!(.root()) } else { quote!() };
    let leaf_call = if is_leaf { quote!(.leaf()) } else { quote!() };
    let multi_call = if is_multioutput {
        quote!(.multi_output())
    } else {
        quote!()
    };

    let expanded = quote! {
        #input

        #fn_vis fn #tracked_name(
            registry: &::plantseg_workflow::FunctionRegistry,
        ) -> ::plantseg_workflow::Result<::plantseg_workflow::TrackedTask> {
            let list_inputs: &[&str] = &[#(#list_inputs),*];
            let list_private_params: &[&str] = &[#(#list_private_params),*];
            ::plantseg_workflow::TrackedTask::builder(#task_name, #fn_name)
                #root_call
                #leaf_call
                #multi_call
                .list_inputs(list_inputs.iter().copied())
                .list_private_params(list_private_params.iter().copied())
                .register(registry)
        }
    };

    TokenStream::from(expanded)
}
