use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one running against a
/// fresh in-memory backend, and inject dependencies.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`] and
/// `crate::TestBackend`, which exposes the stores and the scripted
/// verification gate behind the server.
///
/// `#[backend_test(voter)]` registers and signs in the example voter first;
/// `#[backend_test(admin)]` signs in as the bootstrap admin.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract injected parameters and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Log in the client as admin/voter if needed.
    let maybe_login = match parse_macro_input!(args as Option<Ident>) {
        None => quote! {},
        // Each response borrows the client, so it lives in its own block.
        Some(arg) if arg == "voter" => quote! {
            {
                let response = rocket_client
                    .post(uri!(crate::api::auth::register))
                    .header(rocket::http::ContentType::JSON)
                    .body(rocket::serde::json::json!(crate::model::api::auth::Registration::example()).to_string())
                    .dispatch()
                    .await;
                assert!(
                    response.status().class().is_success(),
                    "example voter registration failed: {}",
                    response.status()
                );
            }
        },
        Some(arg) if arg == "admin" => quote! {
            let config = crate::Config::example();
            let credentials = crate::model::api::auth::Credentials {
                email: config.admin_email().to_string(),
                password: config.admin_password().to_string(),
            };
            {
                let response = rocket_client
                    .post(uri!(crate::api::auth::login))
                    .header(rocket::http::ContentType::JSON)
                    .body(rocket::serde::json::json!(credentials).to_string())
                    .dispatch()
                    .await;
                assert!(
                    response.status().class().is_success(),
                    "admin login failed: {}",
                    response.status()
                );
            }
        },
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected `voter` or `admin`")
                .into_compile_error()
                .into();
        }
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// Test setup.
            async fn setup() -> (rocket::local::asynchronous::Client, crate::TestBackend) {
                let backend = crate::TestBackend::new();
                let rocket_client = rocket::local::asynchronous::Client::tracked(
                    crate::rocket_for_backend(&backend).await,
                )
                .await
                .unwrap();

                #maybe_login

                (rocket_client, backend)
            }

            /// The test itself.
            #item_fn

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            // Nothing outlives the runtime, so there is no cleanup to do.
            runtime.block_on(async {
                #[allow(unused_variables)]
                let (rocket_client, backend) = setup().await;
                #new_name(#(#test_args),*).await;
            });
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_backend = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                if let Some(type_ident) = type_path.path.get_ident() {
                    if type_ident == "Client" {
                        if has_client {
                            return Err(syn::Error::new(
                                input.span(),
                                "Test cannot accept more than one `rocket::local::asynchronous::Client`",
                            ));
                        }
                        has_client = true;
                        args.push(quote! { rocket_client });
                        continue;
                    } else if type_ident == "TestBackend" {
                        if has_backend {
                            return Err(syn::Error::new(
                                input.span(),
                                "Test cannot accept more than one `TestBackend`",
                            ));
                        }
                        has_backend = true;
                        args.push(quote! { backend });
                        continue;
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client` or `backend_ident: TestBackend`",
        ));
    }

    Ok(args)
}
