use anyhow::{Context, Result};
use ethers::{signers::LocalWallet, signers::Signer, types::U256};
use std::time::Duration;
use x402_agent::{
    client::{GatewayClient, QueryOutcome},
    models::{format_native, WalletAddress},
    services::{ChainClient, EthereumChain},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // Load configuration
    dotenvy::dotenv().ok();

    let base_url = std::env::var("GATEWAY_URL").unwrap_or_else(|_| "http://localhost:5000".to_string());
    let rpc_url = std::env::var("SEPOLIA_RPC_URL").unwrap_or_else(|_| "https://rpc.sepolia.org".to_string());
    let private_key = std::env::var("TEST_WALLET_PRIVATE_KEY").context("TEST_WALLET_PRIVATE_KEY is required")?;
    let query = std::env::var("TEST_QUERY").unwrap_or_else(|_| "What is the current ETH price?".to_string());

    let wallet: LocalWallet = private_key.parse().context("Invalid TEST_WALLET_PRIVATE_KEY")?;
    let address = WalletAddress::from(wallet.address());
    let gateway = GatewayClient::new(&base_url)?;

    println!("x402 Test Agent");
    println!("===============");
    println!("Gateway: {}", base_url);
    println!("Wallet:  {}", address);
    println!();

    println!("Step 1: Querying the agent (expecting 402)...");
    let challenge = match gateway.query(address, &query).await? {
        QueryOutcome::Answered(answer) => {
            println!("   [OK] Existing credit consumed, answer:");
            println!("   {}", answer.response);
            return Ok(());
        }
        QueryOutcome::PaymentRequired(challenge) => challenge,
    };
    println!(
        "   [OK] Payment required: {} {} to {} on {}",
        challenge.required_amount_native,
        challenge.asset,
        challenge.destination_address,
        challenge.network
    );
    println!();

    let amount = U256::from_dec_str(&challenge.required_amount_atomic)
        .context("Challenge carried a malformed atomic amount")?;
    let chain = EthereumChain::new(&rpc_url, challenge.chain_id, Duration::from_secs(180))?;

    let balance = chain.get_balance(address).await?;
    println!("Your balance: {} ETH", format_native(balance));
    if balance <= amount {
        println!("[ERROR] Insufficient balance! You need more than {} ETH plus gas", format_native(amount));
        println!("Get Sepolia ETH from a faucet and retry.");
        return Ok(());
    }

    println!("Step 2: Sending payment...");
    let tx_hash = chain
        .send_transfer(&wallet, challenge.destination_address, amount)
        .await?;
    println!("   [OK] Payment sent: {}", tx_hash);
    println!("   View on Etherscan: https://sepolia.etherscan.io/tx/{}", tx_hash);

    let receipt = chain.await_confirmations(tx_hash, 1).await?;
    if !receipt.succeeded {
        anyhow::bail!("Payment {} reverted on-chain", tx_hash);
    }
    println!("   [OK] Mined in block {:?}", receipt.block_number);
    println!();

    println!("Step 3: Submitting the transaction for verification...");
    let verification = gateway
        .verify_until_settled(tx_hash, address, 10, Duration::from_secs(5))
        .await?;
    if !verification.success {
        anyhow::bail!(
            "Verification failed ({:?}): {}",
            verification.reason,
            verification.message
        );
    }
    println!("   [OK] {}", verification.message);
    println!();

    println!("Step 4: Retrying the query...");
    match gateway.query(address, &query).await? {
        QueryOutcome::Answered(answer) => {
            println!("[SUCCESS] Agent answered:");
            println!("{}", answer.response);
        }
        QueryOutcome::PaymentRequired(_) => {
            println!("[FAILED] Still asked for payment after verification");
        }
    }

    Ok(())
}
