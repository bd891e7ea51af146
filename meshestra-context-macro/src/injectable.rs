use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Attribute, Data, DeriveInput, Field, Fields, GenericArgument, Ident, LitStr, Meta,
    PathArguments, Token, Type,
    parse::{Parse, ParseStream},
    parse_macro_input,
    spanned::Spanned,
};

/// Arguments of `#[inject(...)]` and `#[config(...)]`.
#[derive(Default)]
struct AttrArgs {
    key: Option<LitStr>,
    view_tag: Option<LitStr>,
    getter: bool,
    view: bool,
    optional: bool,
}

impl Parse for AttrArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = AttrArgs::default();
        while !input.is_empty() {
            if input.peek(LitStr) {
                args.key = Some(input.parse()?);
            } else {
                let name: Ident = input.parse()?;
                if input.peek(Token![=]) {
                    input.parse::<Token![=]>()?;
                    let value: LitStr = input.parse()?;
                    match name.to_string().as_str() {
                        "key" | "path" => args.key = Some(value),
                        "view_tag" => args.view_tag = Some(value),
                        _ => {
                            return Err(syn::Error::new(
                                name.span(),
                                format!("unknown argument `{name}`"),
                            ));
                        }
                    }
                } else {
                    match name.to_string().as_str() {
                        "getter" => args.getter = true,
                        "view" => args.view = true,
                        "optional" => args.optional = true,
                        _ => {
                            return Err(syn::Error::new(
                                name.span(),
                                format!("unknown flag `{name}`"),
                            ));
                        }
                    }
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }
        Ok(args)
    }
}

enum Source {
    Inject(AttrArgs),
    Config(AttrArgs),
    Default,
}

pub fn derive_injectable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let expanded = generate_injectable_impl(&input).unwrap_or_else(syn::Error::into_compile_error);
    TokenStream::from(expanded)
}

fn generate_injectable_impl(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            Fields::Unit => {
                return Ok(quote! {
                    impl #impl_generics ::meshestra_context::di::Injectable for #struct_name #ty_generics #where_clause {
                        fn construct(
                            _args: ::meshestra_context::di::InjectedArgs,
                        ) -> ::meshestra_context::anyhow::Result<Self> {
                            Ok(Self)
                        }
                    }
                });
            }
            Fields::Unnamed(_) => {
                return Err(syn::Error::new(
                    input.span(),
                    "#[derive(Injectable)] only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "#[derive(Injectable)] can only be applied to structs",
            ));
        }
    };

    let mut dependencies = Vec::new();
    let mut initializers = Vec::new();
    for field in fields {
        let field_name = &field.ident;
        let index = dependencies.len();
        match field_injection(field, index)? {
            Some((dependency, init)) => {
                dependencies.push(dependency);
                initializers.push(quote! { #field_name: #init });
            }
            None => initializers.push(quote! { #field_name: ::core::default::Default::default() }),
        }
    }

    Ok(quote! {
        impl #impl_generics ::meshestra_context::di::Injectable for #struct_name #ty_generics #where_clause {
            fn dependencies() -> ::std::vec::Vec<::meshestra_context::di::Injection> {
                ::std::vec![#(#dependencies),*]
            }

            #[allow(unused_mut)]
            fn construct(
                mut args: ::meshestra_context::di::InjectedArgs,
            ) -> ::meshestra_context::anyhow::Result<Self> {
                Ok(Self {
                    #(#initializers),*
                })
            }
        }
    })
}

fn field_source(field: &Field) -> syn::Result<Source> {
    let mut source = Source::Default;
    for attr in &field.attrs {
        let parsed = if attr.path().is_ident("inject") {
            Source::Inject(parse_args(attr)?)
        } else if attr.path().is_ident("config") {
            Source::Config(parse_args(attr)?)
        } else {
            continue;
        };
        if !matches!(source, Source::Default) {
            return Err(syn::Error::new(
                attr.span(),
                "a field takes a single #[inject] or #[config] attribute",
            ));
        }
        source = parsed;
    }
    Ok(source)
}

fn parse_args(attr: &Attribute) -> syn::Result<AttrArgs> {
    match &attr.meta {
        Meta::Path(_) => Ok(AttrArgs::default()),
        _ => attr.parse_args(),
    }
}

/// The dependency declaration and the initializer for one field.
fn field_injection(field: &Field, index: usize) -> syn::Result<Option<(TokenStream2, TokenStream2)>> {
    match field_source(field)? {
        Source::Default => Ok(None),
        Source::Inject(args) => inject_field(field, &args, index).map(Some),
        Source::Config(args) => config_field(field, &args, index).map(Some),
    }
}

fn inject_field(
    field: &Field,
    args: &AttrArgs,
    index: usize,
) -> syn::Result<(TokenStream2, TokenStream2)> {
    if let Some(tag) = &args.view_tag {
        return Ok((
            quote! {
                ::meshestra_context::di::Injection::View {
                    filter: ::meshestra_context::context::filter_by_tag(#tag),
                }
            },
            quote! { args.take_view(#index)? },
        ));
    }

    let Some(key) = &args.key else {
        return Err(syn::Error::new(
            field.span(),
            "#[inject] needs a binding key: #[inject(\"key\")]",
        ));
    };

    if args.getter {
        return Ok((
            quote! { ::meshestra_context::di::Injection::getter(#key) },
            quote! { args.take_getter(#index)? },
        ));
    }

    if let Some(inner) = wrapped_type(&field.ty, "Option") {
        let value_type = arc_inner(inner, field)?;
        return Ok((
            quote! { ::meshestra_context::di::Injection::optional(#key) },
            quote! { args.take_optional::<#value_type>(#index)? },
        ));
    }

    if args.optional {
        return Err(syn::Error::new(
            field.ty.span(),
            "optional injections must be declared as Option<Arc<T>>",
        ));
    }

    let value_type = arc_inner(&field.ty, field)?;
    Ok((
        quote! { ::meshestra_context::di::Injection::key(#key) },
        quote! { args.take::<#value_type>(#index)? },
    ))
}

fn config_field(
    field: &Field,
    args: &AttrArgs,
    index: usize,
) -> syn::Result<(TokenStream2, TokenStream2)> {
    let path = args
        .key
        .as_ref()
        .map(LitStr::value)
        .unwrap_or_default();

    if args.getter {
        return Ok((
            quote! { ::meshestra_context::di::Injection::config_getter(#path) },
            quote! { args.take_config_getter(#index)? },
        ));
    }

    if args.view {
        return Ok((
            quote! { ::meshestra_context::di::Injection::config_view(#path) },
            quote! { args.take_config_view(#index)? },
        ));
    }

    if let Some(inner) = wrapped_type(&field.ty, "Option") {
        return Ok((
            quote! { ::meshestra_context::di::Injection::config(#path) },
            quote! { args.take_config::<#inner>(#index)? },
        ));
    }

    let ty = &field.ty;
    Ok((
        quote! { ::meshestra_context::di::Injection::required_config(#path) },
        quote! {
            args.take_config::<#ty>(#index)?.ok_or_else(|| {
                ::meshestra_context::anyhow::anyhow!(
                    "Configuration '{}' of {} is missing",
                    #path,
                    ::std::any::type_name::<Self>()
                )
            })?
        },
    ))
}

fn arc_inner<'a>(ty: &'a Type, field: &Field) -> syn::Result<&'a Type> {
    wrapped_type(ty, "Arc").ok_or_else(|| {
        syn::Error::new(
            field.ty.span(),
            "#[inject] fields must be Arc<T> or Option<Arc<T>>",
        )
    })
}

/// Extracts `T` from `Wrapper<T>`, matching on the last path segment.
fn wrapped_type<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}
