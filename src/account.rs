use anyhow::{Context, Result};

use crate::model::Chain;
use crate::run::config::{VAULT_RPC_ENV, api_key_from_env, signer_from_env};
use crate::venues::evm::{self, short_addr};
use crate::venues::onebalance::OneBalanceClient;
use crate::venues::onebalance::types::aggregated_asset_id;
use crate::venues::vault::read_vault_allocation;

pub fn run(tokens: &[String]) -> Result<()> {
    let signer = signer_from_env()?;
    let client = OneBalanceClient::new(&api_key_from_env()?)?;
    let wallet = signer.address();

    let rt = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
    rt.block_on(async {
        let account = client
            .predict_address(wallet, wallet)
            .await
            .context("predicting aggregated account address")?;
        println!("Signer:     {:?}", wallet);
        println!("Aggregated: {:?}", account);
        println!();

        let balance = client.aggregated_balance(account).await?;
        println!("{:<8} {:>24} {:>12}", "TOKEN", "BALANCE", "USD");
        println!("{}", "-".repeat(46));
        for token in tokens {
            let token = token.to_uppercase();
            match balance.asset(&aggregated_asset_id(&token)) {
                Some(asset) => {
                    println!("{:<8} {:>24} {:>12.2}", token, asset.balance, asset.fiat_value);
                    for held in &asset.individual_asset_balances {
                        println!("  {:<30} {:>24}", held.asset_type, held.balance);
                    }
                }
                None => println!("{:<8} {:>24} {:>12}", token, 0, "—"),
            }
        }
        if let Some(total) = &balance.total_balance {
            println!("\nTotal: ${:.2}", total.fiat_value);
        }

        let rpc_url = std::env::var(VAULT_RPC_ENV).unwrap_or_else(|_| Chain::Arbitrum.rpc_url().to_string());
        println!();
        for (token, vault) in evm::default_vaults() {
            match read_vault_allocation(&rpc_url, vault).await {
                Ok(view) => println!(
                    "Vault {} ({}): allocation {}, APY {} bps",
                    token,
                    short_addr(&vault),
                    view.allocation,
                    view.apy_basis_points
                ),
                Err(e) => println!("Vault {} ({}): unreadable: {:#}", token, short_addr(&vault), e),
            }
        }
        Ok(())
    })
}
