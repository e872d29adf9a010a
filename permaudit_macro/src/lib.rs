use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, parse_quote, Ident, ImplItem, ItemImpl};

/// Default timestamp generator.
///
/// Automatically fill `created_at` and `updated_at` on create and update.
///
/// # Examples
/// ```ignore
/// #[entity_timestamp]
/// impl ActiveModel {}
/// ```
#[proc_macro_attribute]
pub fn entity_timestamp(_: TokenStream, input: TokenStream) -> TokenStream {
    let mut entity = parse_macro_input!(input as ItemImpl);
    entity.items.push(parse_quote!(
        fn entity_timestamp(&self, e: &mut Self, insert: bool) {
            let tm: sea_orm::ActiveValue<sea_orm::prelude::DateTime> =
                sea_orm::ActiveValue::set(chrono::Utc::now().naive_utc());
            if insert {
                e.created_at = tm.clone();
                e.updated_at = tm;
            } else {
                e.updated_at = tm;
            }
        }
    ));
    quote! {
        #entity
    }
    .into()
}

/// Default entity behavior:
/// - `entity_timestamp`
///
/// # Examples
/// ```ignore
/// #[entity_behavior]
/// impl ActiveModelBehavior for ActiveModel {}
/// ```
#[proc_macro_attribute]
pub fn entity_behavior(_: TokenStream, input: TokenStream) -> TokenStream {
    let mut entity = parse_macro_input!(input as ItemImpl);

    entity.items.push(parse_quote!(
        async fn before_save<C>(self, _: &C, insert: bool) -> Result<Self, DbErr>
        where
            C: ConnectionTrait,
        {
            let mut new = self.clone();
            self.entity_timestamp(&mut new, insert);
            Ok(new)
        }
    ));
    quote! {
        #[async_trait::async_trait]
        #entity
    }
    .into()
}

/// Implement default viewer lookups for an entity with `id`, `code` and
/// `deleted_at` columns. Functions already defined in the impl are kept.
///
/// Generated: `find_by_id`, `find_by_code`, `count`.
///
/// # Examples
/// ```ignore
/// #[default_viewer(roles)]
/// impl RoleViewer {
/// ...
/// }
/// ```
#[proc_macro_attribute]
pub fn default_viewer(attr: TokenStream, input: TokenStream) -> TokenStream {
    let attr = parse_macro_input!(attr as Ident);
    let mut input = parse_macro_input!(input as ItemImpl);
    let func: Vec<String> = input
        .items
        .iter()
        .map(|x| {
            if let ImplItem::Fn(x) = x {
                x.sig.ident.to_string()
            } else {
                String::new()
            }
        })
        .collect();
    let contains = |name: &str| func.iter().any(|x| x == name);

    if !contains("find_by_id") {
        input.items.push(parse_quote! {
            /// Find record by `id`, soft-deleted rows included.
            pub async fn find_by_id<C>(db: &C, id: i32) -> crate::Result<Option<#attr::Model>>
            where
                C: sea_orm::ConnectionTrait,
            {
                use sea_orm::EntityTrait;
                #attr::Entity::find_by_id(id)
                    .one(db)
                    .await
                    .map_err(Into::into)
            }
        });
    }
    if !contains("find_by_code") {
        input.items.push(parse_quote! {
            /// Find live record by `code`.
            pub async fn find_by_code<C>(db: &C, code: &str) -> crate::Result<Option<#attr::Model>>
            where
                C: sea_orm::ConnectionTrait,
            {
                use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
                #attr::Entity::find()
                    .filter(#attr::Column::Code.eq(code))
                    .filter(#attr::Column::DeletedAt.is_null())
                    .one(db)
                    .await
                    .map_err(Into::into)
            }
        });
    }
    if !contains("count") {
        input.items.push(parse_quote! {
            /// Count live records.
            pub async fn count<C>(db: &C) -> crate::Result<u64>
            where
                C: sea_orm::ConnectionTrait,
            {
                use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
                #attr::Entity::find()
                    .filter(#attr::Column::DeletedAt.is_null())
                    .count(db)
                    .await
                    .map_err(Into::into)
            }
        });
    }

    quote! {
        #input
    }
    .into()
}
